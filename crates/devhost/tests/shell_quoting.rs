//! Quoting round-trips through a real shell.

#![cfg(unix)]

use devhost::context::quote_arg;
use tokio::process::Command;

async fn round_trip(input: &str) -> String {
    let output = Command::new("sh")
        .arg("-c")
        .arg(format!("printf '%s' {}", quote_arg(input)))
        .output()
        .await
        .expect("shell ran");
    assert!(output.status.success());
    String::from_utf8(output.stdout).expect("utf8 output")
}

#[tokio::test]
async fn test_quoting_survives_a_real_shell() {
    for input in [
        "plain",
        "has space",
        "it's quoted",
        "two  spaces",
        "semi;colon && echo pwned",
        "dollar $HOME backtick `id`",
        "wild*card?[x]",
        "'already quoted'",
    ] {
        assert_eq!(round_trip(input).await, input, "round trip for {input:?}");
    }
}

#[tokio::test]
async fn test_empty_argument_round_trips() {
    assert_eq!(round_trip("").await, "");
}
