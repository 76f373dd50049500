use std::sync::OnceLock;

use regex::Regex;

static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();

fn placeholder() -> &'static Regex {
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r#"\{\{\s*([a-zA-Z0-9_.]+)\s*(?:\|\s*default\("([^"]*)"\))?\s*\}\}"#)
            .expect("placeholder pattern is valid")
    })
}

/// Substitute `{{ env.VAR }}` placeholders in raw config text
///
/// A placeholder may carry a fallback: `{{ env.VAR | default("x") }}`.
/// Substitution runs before TOML parsing, so channel credentials can stay out
/// of the file. Comment lines are copied through untouched.
pub fn expand_env(input: &str) -> Result<String, String> {
    input
        .split_inclusive('\n')
        .map(|line| {
            if line.trim_start().starts_with('#') {
                Ok(line.to_owned())
            } else {
                expand_line(line)
            }
        })
        .collect()
}

fn expand_line(line: &str) -> Result<String, String> {
    let mut expanded = String::with_capacity(line.len());
    let mut cursor = 0;

    for captures in placeholder().captures_iter(line) {
        let (Some(whole), Some(key)) = (captures.get(0), captures.get(1)) else {
            continue;
        };
        expanded.push_str(&line[cursor..whole.start()]);
        expanded.push_str(&resolve(key.as_str(), captures.get(2).map(|m| m.as_str()))?);
        cursor = whole.end();
    }

    expanded.push_str(&line[cursor..]);
    Ok(expanded)
}

/// Resolve a single `env.VAR` key, honouring an optional default
fn resolve(key: &str, default_value: Option<&str>) -> Result<String, String> {
    let mut parts = key.split('.');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("env"), Some(var_name), None) => std::env::var(var_name).or_else(|_| {
            default_value
                .map(str::to_owned)
                .ok_or_else(|| format!("environment variable not found: `{var_name}`"))
        }),
        _ => Err(format!("only variables scoped with 'env.' are supported: `{key}`")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_placeholders() {
        let input = "key = \"value\"";
        assert_eq!(expand_env(input).unwrap(), input);
    }

    #[test]
    fn single_env_var() {
        temp_env::with_var("RELAY_TEST_VAR", Some("hello"), || {
            let result = expand_env("key = \"{{ env.RELAY_TEST_VAR }}\"").unwrap();
            assert_eq!(result, "key = \"hello\"");
        });
    }

    #[test]
    fn missing_env_var() {
        temp_env::with_var_unset("RELAY_MISSING_VAR", || {
            let err = expand_env("key = \"{{ env.RELAY_MISSING_VAR }}\"").unwrap_err();
            assert!(err.contains("RELAY_MISSING_VAR"));
        });
    }

    #[test]
    fn unsupported_scope() {
        let err = expand_env("key = \"{{ foo.BAR }}\"").unwrap_err();
        assert!(err.contains("only variables scoped with 'env.'"));
    }

    #[test]
    fn commented_lines_skip_expansion() {
        temp_env::with_var_unset("RELAY_MISSING_VAR", || {
            let input = "  # key = \"{{ env.RELAY_MISSING_VAR }}\"";
            assert_eq!(expand_env(input).unwrap(), input);
        });
    }

    #[test]
    fn default_used_when_var_missing() {
        temp_env::with_var_unset("RELAY_OPTIONAL_VAR", || {
            let result = expand_env("key = \"{{ env.RELAY_OPTIONAL_VAR | default(\"fallback\") }}\"").unwrap();
            assert_eq!(result, "key = \"fallback\"");
        });
    }

    #[test]
    fn default_not_used_when_var_present() {
        temp_env::with_var("RELAY_OPTIONAL_VAR", Some("actual"), || {
            let result = expand_env("key = \"{{ env.RELAY_OPTIONAL_VAR | default(\"fallback\") }}\"").unwrap();
            assert_eq!(result, "key = \"actual\"");
        });
    }

    #[test]
    fn trailing_newline_preserved() {
        assert_eq!(expand_env("a = 1\n").unwrap(), "a = 1\n");
    }
}
