//! # Parameters
//!
//! The initial state of a run is assembled from several sources. Each source overwrites the
//! top level keys set by the sources before it:
//!
//! 1. `profiles.toml` in the goat config directory. The `default` profile is applied first
//!    if it exists, then every profile selected with `--profile`.
//! 2. A `.env` file and all environment variables prefixed with `GOAT_`.
//! 3. Parameter files passed with `--params`, either TOML or JSON.
//! 4. `key=value` pairs passed with `--args`.
//!
//! ## Config directory
//!
//! 1. `$GOAT_CONFIG_DIR` if set
//! 2. `$XDG_CONFIG_HOME/goat`
//! 3. `$HOME/.config/goat`
//!
//! ```toml
//! [default]
//! instance = "http://localhost:8080"
//!
//! [staging]
//! instance = "https://staging.example.com"
//! credentials = { user = "admin", password = "admin" }
//! ```
//!
//! ## Environment variables
//!
//! The prefix is stripped and the rest of the name is lower-cased. `__` separates nesting
//! levels, so `GOAT_CREDENTIALS__USER=admin` sets `credentials.user`. Values are always
//! strings.

use crate::engine::State;
use serde_json::{Map, Value as JsonValue};
use std::path::{Path, PathBuf};
use tracing::*;

/// Environment variable name for overriding the config directory.
const CONFIG_DIR_ENV: &str = "GOAT_CONFIG_DIR";
const ENV_PREFIX: &str = "GOAT_";
const PROFILES_FILE: &str = "profiles.toml";
const DEFAULT_PROFILE: &str = "default";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed reading {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed parsing {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("no profiles.toml can be found in your config directory ({0})")]
    NoProfiles(PathBuf),
    #[error("no profile found with name '{0}'")]
    ProfileNotFound(String),
    #[error("value of profile '{0}' is not a table")]
    InvalidProfile(String),
    #[error("invalid key-value pair '{0}'")]
    InvalidKeyValue(String),
    #[error("value '{0}' not found")]
    ValueNotFound(String),
    #[error("value '{key}' is not {expected}")]
    ValueError { key: String, expected: &'static str },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Parameters handed to the executor as initial state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params(State);

impl Params {
    pub fn new() -> Params {
        Params::default()
    }

    /// Loads all sources in order.
    pub fn load(profiles: &[String], files: &[PathBuf], args: &[String]) -> Result<Params> {
        let mut params = Params::new();

        match config_dir() {
            Some(dir) => params.load_profiles(&dir.join(PROFILES_FILE), profiles)?,
            None if !profiles.is_empty() => {
                return Err(Error::NoProfiles(PathBuf::from("~/.config/goat")))
            }
            None => warn!("failed to determine the config directory"),
        }

        let _ = dotenv::dotenv();
        params.load_env(std::env::vars());
        params.load_files(files)?;
        params.load_args(args)?;

        debug!("initial params: {:?}", params.0);
        Ok(params)
    }

    /// Applies the `default` profile, if any, and then every profile in `names` from the
    /// profiles file at `path`.
    pub fn load_profiles(&mut self, path: &Path, names: &[String]) -> Result<()> {
        if !path.exists() {
            if names.is_empty() {
                return Ok(());
            }
            return Err(Error::NoProfiles(
                path.parent().unwrap_or(path).to_path_buf(),
            ));
        }

        let profiles = match read_file(path)? {
            JsonValue::Object(profiles) => profiles,
            _ => Map::new(),
        };

        if profiles.contains_key(DEFAULT_PROFILE) {
            self.apply_profile(&profiles, DEFAULT_PROFILE)?;
        }
        for name in names {
            self.apply_profile(&profiles, name)?;
        }
        Ok(())
    }

    fn apply_profile(&mut self, profiles: &Map<String, JsonValue>, name: &str) -> Result<()> {
        match profiles.get(name) {
            Some(JsonValue::Object(profile)) => {
                debug!(profile = name, "applying profile");
                self.merge(profile.clone());
                Ok(())
            }
            Some(_) => Err(Error::InvalidProfile(name.to_string())),
            None => Err(Error::ProfileNotFound(name.to_string())),
        }
    }

    /// Takes all `GOAT_` prefixed variables of `vars` except the config directory override.
    pub fn load_env(&mut self, vars: impl IntoIterator<Item = (String, String)>) {
        for (key, value) in vars {
            if key == CONFIG_DIR_ENV {
                continue;
            }
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            if name.is_empty() {
                continue;
            }
            let path: Vec<String> = name.split("__").map(str::to_lowercase).collect();
            insert_path(&mut self.0, &path, JsonValue::String(value));
        }
    }

    /// Merges parameter files in order. Missing files are skipped.
    pub fn load_files(&mut self, paths: &[PathBuf]) -> Result<()> {
        for path in paths {
            if !path.exists() {
                debug!(?path, "params file does not exist, skipping");
                continue;
            }
            match read_file(path)? {
                JsonValue::Object(map) => self.merge(map),
                _ => {
                    return Err(Error::Parse {
                        path: path.clone(),
                        message: "top level value is not a map".into(),
                    })
                }
            }
        }
        Ok(())
    }

    /// Applies `key=value` pairs. Dots in keys address nested maps.
    pub fn load_args(&mut self, args: &[String]) -> Result<()> {
        for arg in args {
            let Some((key, value)) = arg.split_once('=') else {
                return Err(Error::InvalidKeyValue(arg.clone()));
            };
            if key.is_empty() {
                return Err(Error::InvalidKeyValue(arg.clone()));
            }
            let path: Vec<String> = key.split('.').map(str::to_string).collect();
            insert_path(&mut self.0, &path, JsonValue::String(value.to_string()));
        }
        Ok(())
    }

    fn merge(&mut self, other: Map<String, JsonValue>) {
        self.0.extend(other);
    }

    /// Looks up a value by its dotted path.
    pub fn get(&self, key: impl AsRef<str>) -> Result<&JsonValue> {
        let key = key.as_ref();
        let mut parts = key.split('.');
        let first = parts.next().unwrap_or_default();
        let mut value = self.0.get(first);
        for part in parts {
            value = value.and_then(|v| v.get(part));
        }
        value.ok_or_else(|| Error::ValueNotFound(key.to_string()))
    }

    pub fn get_str(&self, key: impl AsRef<str>) -> Result<&str> {
        let key = key.as_ref();
        self.get(key)?.as_str().ok_or_else(|| Error::ValueError {
            key: key.to_string(),
            expected: "a string",
        })
    }

    /// Integers may also be given as strings, which is what environment variables and
    /// arguments produce.
    pub fn get_int(&self, key: impl AsRef<str>) -> Result<i64> {
        let key = key.as_ref();
        let value = self.get(key)?;
        value
            .as_i64()
            .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
            .ok_or_else(|| Error::ValueError {
                key: key.to_string(),
                expected: "an integer",
            })
    }

    pub fn get_bool(&self, key: impl AsRef<str>) -> Result<bool> {
        let key = key.as_ref();
        let value = self.get(key)?;
        value
            .as_bool()
            .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
            .ok_or_else(|| Error::ValueError {
                key: key.to_string(),
                expected: "a boolean",
            })
    }

    pub fn state(&self) -> &State {
        &self.0
    }

    pub fn into_state(self) -> State {
        self.0
    }
}

/// Resolves the goat config directory from the environment.
pub fn config_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV) {
        return Some(PathBuf::from(dir));
    }
    if let Ok(dir) = std::env::var("XDG_CONFIG_HOME") {
        if !dir.is_empty() {
            return Some(Path::new(&dir).join("goat"));
        }
    }
    std::env::var("HOME")
        .ok()
        .map(|home| Path::new(&home).join(".config").join("goat"))
}

fn read_file(path: &Path) -> Result<JsonValue> {
    let content = std::fs::read_to_string(path).map_err(|source| Error::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let parse_error = |message: String| Error::Parse {
        path: path.to_path_buf(),
        message,
    };

    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => serde_json::from_str(&content).map_err(|e| parse_error(e.to_string())),
        _ => toml::from_str(&content).map_err(|e| parse_error(e.to_string())),
    }
}

/// Sets `value` at `path`, creating intermediate maps and replacing non-map values on the way.
fn insert_path(map: &mut State, path: &[String], value: JsonValue) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };

    let mut current = map;
    for key in parents {
        let entry = current
            .entry(key.clone())
            .or_insert_with(|| JsonValue::Object(Map::new()));
        if !entry.is_object() {
            *entry = JsonValue::Object(Map::new());
        }
        let JsonValue::Object(next) = entry else {
            return;
        };
        current = next;
    }
    current.insert(last.clone(), value);
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use serial_test::serial;
    use test_case::test_case;

    fn sample_profiles() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("../goat-sample.toml")
    }

    #[test]
    fn default_profile_is_applied_first() -> eyre::Result<()> {
        let mut params = Params::new();
        params.load_profiles(&sample_profiles(), &[])?;
        assert_eq!(params.get_str("instance")?, "http://localhost:8080");

        let mut params = Params::new();
        params.load_profiles(&sample_profiles(), &["staging".into()])?;
        assert_eq!(params.get_str("instance")?, "https://staging.example.com");
        assert_eq!(params.get_str("credentials.user")?, "admin");
        assert_eq!(params.get_int("timeout")?, 30);
        Ok(())
    }

    #[test]
    fn missing_profile() {
        let mut params = Params::new();
        let err = params
            .load_profiles(&sample_profiles(), &["nope".into()])
            .unwrap_err();
        assert_eq!(err.to_string(), "no profile found with name 'nope'");
    }

    #[test]
    fn missing_profiles_file() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join(PROFILES_FILE);

        let mut params = Params::new();
        params.load_profiles(&path, &[])?;
        assert!(params.state().is_empty());
        assert!(matches!(
            params.load_profiles(&path, &["staging".into()]),
            Err(Error::NoProfiles(_))
        ));
        Ok(())
    }

    #[test]
    fn env_vars() -> eyre::Result<()> {
        let mut params = Params::new();
        params.load_env(vec![
            ("GOAT_INSTANCE".to_string(), "http://env".to_string()),
            ("GOAT_CREDENTIALS__USER".to_string(), "bob".to_string()),
            ("GOAT_CONFIG_DIR".to_string(), "/tmp".to_string()),
            ("PATH".to_string(), "/bin".to_string()),
        ]);

        assert_eq!(
            params.into_state(),
            json!({"instance": "http://env", "credentials": {"user": "bob"}})
                .as_object()
                .cloned()
                .unwrap()
        );
        Ok(())
    }

    #[test]
    fn params_files_in_order() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let toml_path = dir.path().join("params.toml");
        let json_path = dir.path().join("params.json");
        std::fs::write(&toml_path, "a = 1\nb = \"toml\"\n[nested]\nflag = true\n")?;
        std::fs::write(&json_path, r#"{"b": "json"}"#)?;

        let mut params = Params::new();
        params.load_files(&[toml_path, dir.path().join("missing.toml"), json_path])?;

        assert_eq!(params.get_int("a")?, 1);
        assert_eq!(params.get_str("b")?, "json");
        assert!(params.get_bool("nested.flag")?);
        Ok(())
    }

    #[test]
    fn malformed_params_file() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("params.json");
        std::fs::write(&path, "{ nope")?;

        let mut params = Params::new();
        assert!(matches!(
            params.load_files(&[path]),
            Err(Error::Parse { .. })
        ));
        Ok(())
    }

    #[test]
    fn key_value_args() -> eyre::Result<()> {
        let mut params = Params::new();
        params.load_args(&[
            "foo.bar=bazz".into(),
            "foo.other=x=y".into(),
            "top=1".into(),
        ])?;

        assert_eq!(params.get("foo")?, &json!({"bar": "bazz", "other": "x=y"}));
        assert_eq!(params.get_int("top")?, 1);
        Ok(())
    }

    #[test_case("novalue"; "missing separator")]
    #[test_case("=value"; "empty key")]
    fn invalid_key_value_args(arg: &str) {
        let err = Params::new().load_args(&[arg.into()]).unwrap_err();
        assert_eq!(err.to_string(), format!("invalid key-value pair '{arg}'"));
    }

    #[test]
    fn typed_getters() -> eyre::Result<()> {
        let mut params = Params::new();
        params.load_args(&["n=42".into(), "b=true".into(), "s=text".into()])?;

        assert_eq!(params.get_int("n")?, 42);
        assert!(params.get_bool("b")?);
        assert!(matches!(
            params.get_int("s"),
            Err(Error::ValueError { .. })
        ));
        assert!(matches!(params.get("x.y"), Err(Error::ValueNotFound(_))));
        Ok(())
    }

    mod config_dir_env {
        use super::*;
        use pretty_assertions::assert_eq;

        #[test]
        #[serial]
        fn override_wins() {
            std::env::set_var(CONFIG_DIR_ENV, "/some/where");
            let dir = config_dir();
            std::env::remove_var(CONFIG_DIR_ENV);

            assert_eq!(dir, Some(PathBuf::from("/some/where")));
        }

        #[test]
        #[serial]
        fn xdg_config_home() {
            std::env::remove_var(CONFIG_DIR_ENV);
            let previous = std::env::var("XDG_CONFIG_HOME").ok();
            std::env::set_var("XDG_CONFIG_HOME", "/xdg");
            let dir = config_dir();
            match previous {
                Some(value) => std::env::set_var("XDG_CONFIG_HOME", value),
                None => std::env::remove_var("XDG_CONFIG_HOME"),
            }

            assert_eq!(dir, Some(PathBuf::from("/xdg/goat")));
        }

        #[test]
        #[serial]
        fn load_reads_profiles_from_config_dir() -> eyre::Result<()> {
            let dir = tempfile::tempdir()?;
            std::fs::copy(sample_profiles(), dir.path().join(PROFILES_FILE))?;

            std::env::set_var(CONFIG_DIR_ENV, dir.path());
            let params = Params::load(&["staging".into()], &[], &["timeout=5".into()]);
            std::env::remove_var(CONFIG_DIR_ENV);

            let params = params?;
            assert_eq!(params.get_str("instance")?, "https://staging.example.com");
            assert_eq!(params.get_int("timeout")?, 5);
            Ok(())
        }
    }
}
