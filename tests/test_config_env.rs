//! Environment overrides in configuration discovery
//!
//! These tests mutate process-global environment variables and are
//! serialized with `serial_test`.

use deftriage::{CliArgs, Config, EngineSettings};
use deftriage_config::{LOCALE_ENV_VAR, MODEL_ENV_VAR};
use serial_test::serial;
use tempfile::TempDir;

struct EnvGuard {
    saved: Vec<(&'static str, Option<String>)>,
}

impl EnvGuard {
    fn set(vars: &[(&'static str, &str)]) -> Self {
        let saved = vars
            .iter()
            .map(|(k, _)| (*k, std::env::var(k).ok()))
            .collect();
        for (k, v) in vars {
            unsafe { std::env::set_var(k, v) };
        }
        Self { saved }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (k, v) in &self.saved {
            match v {
                Some(v) => unsafe { std::env::set_var(k, v) },
                None => unsafe { std::env::remove_var(k) },
            }
        }
    }
}

fn project_with_config(toml: &str) -> TempDir {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir(dir.path().join(".git")).unwrap();
    std::fs::create_dir(dir.path().join(".deftriage")).unwrap();
    std::fs::write(dir.path().join(".deftriage/config.toml"), toml).unwrap();
    dir
}

const CONFIG: &str = r#"
[engine]
locale = "de-DE"
max_total_steps = 5

[llm.openai]
model = "file-model"
"#;

#[test]
#[serial]
fn env_overrides_file_values() {
    let dir = project_with_config(CONFIG);
    let _env = EnvGuard::set(&[(MODEL_ENV_VAR, "env-model"), (LOCALE_ENV_VAR, "zh-CN")]);

    let config = Config::discover_from(dir.path(), &CliArgs::default()).unwrap();
    let settings = EngineSettings::from_config(&config);

    assert_eq!(settings.model.as_deref(), Some("env-model"));
    assert_eq!(settings.locale, "zh-CN");
    assert_eq!(settings.dispatch.max_total_steps, 5);
}

#[test]
#[serial]
fn cli_flags_override_env() {
    let dir = project_with_config(CONFIG);
    let _env = EnvGuard::set(&[(MODEL_ENV_VAR, "env-model"), (LOCALE_ENV_VAR, "zh-CN")]);
    let cli = CliArgs {
        model: Some("flag-model".to_string()),
        locale: Some("en-US".to_string()),
        ..CliArgs::default()
    };

    let config = Config::discover_from(dir.path(), &cli).unwrap();
    let settings = EngineSettings::from_config(&config);

    assert_eq!(settings.model.as_deref(), Some("flag-model"));
    assert_eq!(settings.locale, "en-US");
}

#[test]
#[serial]
fn empty_env_values_are_ignored() {
    let dir = project_with_config(CONFIG);
    let _env = EnvGuard::set(&[(MODEL_ENV_VAR, ""), (LOCALE_ENV_VAR, "")]);

    let config = Config::discover_from(dir.path(), &CliArgs::default()).unwrap();
    let settings = EngineSettings::from_config(&config);

    assert_eq!(settings.model.as_deref(), Some("file-model"));
    assert_eq!(settings.locale, "de-DE");
}
