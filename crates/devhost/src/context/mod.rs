//! Execution context resolution and command translation.
//!
//! A project directory either lives on the native filesystem or inside a WSL
//! distribution reachable through the `\\wsl$\` / `\\wsl.localhost\` UNC
//! namespace. Commands aimed at a bridged directory are rewritten into a
//! `wsl.exe` invocation that runs through a login shell inside the
//! distribution, so version managers and PATH extensions set up in the inner
//! shell profile are honored.
//!
//! Everything here is pure string manipulation: no filesystem I/O.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{DevhostError, DevhostResult};

/// UNC prefixes that mark a path as living inside a WSL distribution.
const BRIDGE_MARKERS: [&str; 2] = [r"\\wsl$\", r"\\wsl.localhost\"];

/// Characters that pass through the bridge unquoted.
fn is_safe_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/' | ':' | '=' | '@' | '%' | '+' | ',')
}

/// Where a command will execute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionContext {
    /// The host operating system.
    Native,
    /// A WSL distribution reached through the UNC bridge.
    Bridged {
        /// Distribution name extracted from the UNC prefix.
        bridge_id: String,
        /// The path as seen from inside the distribution.
        translated_path: String,
    },
}

impl ExecutionContext {
    pub fn is_bridged(&self) -> bool {
        matches!(self, ExecutionContext::Bridged { .. })
    }
}

/// A command ready to hand to the process spawner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    /// Working directory for the spawned process. `None` for bridged
    /// invocations: the directory change happens inside the bridge shell.
    pub cwd: Option<String>,
    /// Environment for the spawned process. Empty for bridged invocations:
    /// forwarded variables travel inside the bridge shell line instead.
    pub env: HashMap<String, String>,
}

/// Options accompanying a command to be translated.
#[derive(Debug, Clone, Default)]
pub struct TranslateOptions {
    pub cwd: String,
    /// Environment variables the caller wants visible inside the command.
    pub env: HashMap<String, String>,
}

/// Classify a filesystem path as native or bridged.
///
/// Derived once per path; the result is immutable. A recognized marker with an
/// empty distribution segment is malformed rather than native.
pub fn resolve(path: &str) -> DevhostResult<ExecutionContext> {
    for marker in BRIDGE_MARKERS {
        if let Some(rest) = strip_prefix_ignore_case(path, marker) {
            let (distro, inner) = match rest.split_once('\\') {
                Some((distro, inner)) => (distro, inner),
                None => (rest, ""),
            };
            if distro.is_empty() {
                return Err(DevhostError::ContextResolutionFailed(path.to_string()));
            }
            let translated = format!("/{}", inner.replace('\\', "/"));
            return Ok(ExecutionContext::Bridged {
                bridge_id: distro.to_string(),
                translated_path: translated,
            });
        }
    }
    Ok(ExecutionContext::Native)
}

fn strip_prefix_ignore_case<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    if path.len() >= prefix.len() && path[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&path[prefix.len()..])
    } else {
        None
    }
}

/// Rewrite `(command, args, options)` into a form invocable in the context
/// `options.cwd` resolves to.
///
/// Native contexts come back unchanged. Bridged contexts are wrapped in a
/// `wsl.exe -d <distro> -- bash -lc "..."` invocation that changes into the
/// translated directory first and forwards only the environment variables
/// whose value differs from the ambient one, avoiding bridge quoting pitfalls
/// for values that are already inherited.
pub fn translate(
    command: &str,
    args: &[String],
    options: &TranslateOptions,
) -> DevhostResult<Invocation> {
    let ambient: HashMap<String, String> = std::env::vars().collect();
    translate_with_ambient(command, args, options, &ambient)
}

/// [`translate`] with an injectable ambient environment, for tests.
pub fn translate_with_ambient(
    command: &str,
    args: &[String],
    options: &TranslateOptions,
    ambient: &HashMap<String, String>,
) -> DevhostResult<Invocation> {
    for key in options.env.keys() {
        if !is_valid_env_key(key) {
            return Err(DevhostError::InvalidInput(format!(
                "environment variable name '{key}' is not a valid identifier"
            )));
        }
    }

    let context = resolve(&options.cwd)?;
    let ExecutionContext::Bridged {
        bridge_id,
        translated_path,
    } = context
    else {
        return Ok(Invocation {
            program: command.to_string(),
            args: args.to_vec(),
            cwd: Some(options.cwd.clone()),
            env: options.env.clone(),
        });
    };

    let mut inner = format!("cd {}", quote_arg(&translated_path));

    let mut env_pairs: Vec<(&String, &String)> = options
        .env
        .iter()
        .filter(|(key, value)| ambient.get(*key) != Some(*value))
        .collect();
    env_pairs.sort_by(|a, b| a.0.cmp(b.0));

    inner.push_str(" && ");
    for (key, value) in env_pairs {
        inner.push_str(key);
        inner.push('=');
        inner.push_str(&quote_arg(value));
        inner.push(' ');
    }
    inner.push_str(&quote_arg(command));
    for arg in args {
        inner.push(' ');
        inner.push_str(&quote_arg(arg));
    }

    Ok(Invocation {
        program: "wsl.exe".to_string(),
        args: vec![
            "-d".to_string(),
            bridge_id,
            "--".to_string(),
            "bash".to_string(),
            "-lc".to_string(),
            inner,
        ],
        cwd: None,
        env: HashMap::new(),
    })
}

/// Environment variable names pass into a shell line unquoted, so only
/// identifier-shaped names are accepted.
fn is_valid_env_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Quote one argument for the inner shell.
///
/// Arguments made entirely of the conservative safe set pass through
/// unescaped. Everything else is wrapped in single quotes, with internal
/// single quotes escaped by closing the quote, inserting `\'`, and reopening.
pub fn quote_arg(arg: &str) -> String {
    if !arg.is_empty() && arg.chars().all(is_safe_char) {
        return arg.to_string();
    }
    let mut quoted = String::with_capacity(arg.len() + 2);
    quoted.push('\'');
    for c in arg.chars() {
        if c == '\'' {
            quoted.push_str(r"'\''");
        } else {
            quoted.push(c);
        }
    }
    quoted.push('\'');
    quoted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_native() {
        assert_eq!(resolve("/home/dev/app").unwrap(), ExecutionContext::Native);
        assert_eq!(resolve(r"C:\projects\app").unwrap(), ExecutionContext::Native);
    }

    #[test]
    fn test_resolve_bridged() {
        let context = resolve(r"\\wsl$\Ubuntu\home\dev\app").unwrap();
        assert_eq!(
            context,
            ExecutionContext::Bridged {
                bridge_id: "Ubuntu".to_string(),
                translated_path: "/home/dev/app".to_string(),
            }
        );
    }

    #[test]
    fn test_resolve_localhost_marker_case_insensitive() {
        let context = resolve(r"\\WSL.LOCALHOST\Debian\srv\web").unwrap();
        assert_eq!(
            context,
            ExecutionContext::Bridged {
                bridge_id: "Debian".to_string(),
                translated_path: "/srv/web".to_string(),
            }
        );
    }

    #[test]
    fn test_resolve_missing_distro_fails() {
        assert!(resolve(r"\\wsl$\").is_err());
    }

    #[test]
    fn test_quote_safe_passthrough() {
        assert_eq!(quote_arg("run"), "run");
        assert_eq!(quote_arg("--port=3000"), "--port=3000");
        assert_eq!(quote_arg("/usr/local/bin"), "/usr/local/bin");
    }

    #[test]
    fn test_quote_space_and_single_quote() {
        assert_eq!(quote_arg("my app"), "'my app'");
        assert_eq!(quote_arg("it's here"), r"'it'\''s here'");
        assert_eq!(quote_arg(""), "''");
    }

    #[test]
    fn test_translate_native_unchanged() {
        let options = TranslateOptions {
            cwd: "/home/dev/app".to_string(),
            env: HashMap::new(),
        };
        let invocation = translate("npm", &["run".into(), "dev".into()], &options).unwrap();
        assert_eq!(invocation.program, "npm");
        assert_eq!(invocation.args, vec!["run", "dev"]);
        assert_eq!(invocation.cwd.as_deref(), Some("/home/dev/app"));
    }

    #[test]
    fn test_translate_bridged_wraps_in_login_shell() {
        let options = TranslateOptions {
            cwd: r"\\wsl$\Ubuntu\home\dev\my app".to_string(),
            env: HashMap::new(),
        };
        let invocation =
            translate_with_ambient("npm", &["run".into(), "dev".into()], &options, &HashMap::new())
                .unwrap();
        assert_eq!(invocation.program, "wsl.exe");
        assert_eq!(&invocation.args[..5], &["-d", "Ubuntu", "--", "bash", "-lc"]);
        assert_eq!(invocation.args[5], "cd '/home/dev/my app' && npm run dev");
        assert!(invocation.cwd.is_none());
    }

    #[test]
    fn test_translate_rejects_malformed_env_keys() {
        for bad in ["BAD KEY", "1LEADING", "SEMI;COLON", "", "PA$H"] {
            let mut env = HashMap::new();
            env.insert(bad.to_string(), "x".to_string());
            let options = TranslateOptions {
                cwd: r"\\wsl$\Ubuntu\srv\web".to_string(),
                env,
            };
            let result = translate_with_ambient("node", &[], &options, &HashMap::new());
            assert!(
                matches!(result, Err(DevhostError::InvalidInput(_))),
                "key {bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_translate_native_carries_env() {
        let mut env = HashMap::new();
        env.insert("_PORT_1".to_string(), "3000".to_string());
        let options = TranslateOptions {
            cwd: "/home/dev/app".to_string(),
            env,
        };
        let invocation =
            translate_with_ambient("node", &[], &options, &HashMap::new()).unwrap();
        assert_eq!(invocation.env["_PORT_1"], "3000");
    }

    #[test]
    fn test_translate_forwards_only_differing_env() {
        let mut env = HashMap::new();
        env.insert("PORT".to_string(), "3000".to_string());
        env.insert("HOME".to_string(), "/home/dev".to_string());
        let mut ambient = HashMap::new();
        ambient.insert("HOME".to_string(), "/home/dev".to_string());

        let options = TranslateOptions {
            cwd: r"\\wsl$\Ubuntu\srv\web".to_string(),
            env,
        };
        let invocation = translate_with_ambient("node", &[], &options, &ambient).unwrap();
        let inner = &invocation.args[5];
        assert!(inner.contains("PORT=3000"));
        assert!(!inner.contains("HOME="));
    }
}
