//! Terminal output sanitation.
//!
//! Process output reaches the supervisor through two different pipes: a direct
//! one for native processes and the bridge pipe for WSL processes. The bridge
//! pipe sometimes drops the ESC byte of a control sequence, leaving an orphaned
//! `[32m`-style fragment in the stream. Both the intact and the orphaned forms
//! are removed here before any text is relayed or inspected.

use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;

/// Escape-introduced control sequences: CSI, OSC (BEL- or ST-terminated), and
/// two-byte escapes.
static ANSI_SEQUENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[@A-Z\\^_]")
        .unwrap()
});

/// Bracket codes whose ESC byte was lost in transit: a literal `[` followed by
/// digit/semicolon groups and a single terminal letter. Requires at least one
/// digit so literal brackets like `[info]` or `array[0]` survive.
static ORPHANED_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[[0-9;]+[A-Za-z]").unwrap());

/// Remove terminal control sequences, including ones mangled in transit
/// through the bridge, from a raw text chunk.
///
/// Idempotent: re-sanitizing already-clean text is a no-op, and no byte
/// outside the two patterns is altered. Removal runs to a fixpoint because
/// deleting one sequence can splice the surrounding bytes into another.
pub fn sanitize(text: &str) -> String {
    let mut out = text.to_string();
    loop {
        let stripped: Cow<'_, str> = ANSI_SEQUENCE.replace_all(&out, "");
        let next = ORPHANED_CODE.replace_all(&stripped, "");
        if next == out {
            return out;
        }
        out = next.into_owned();
    }
}
