//! Host settings read from a JSON file.
//!
//! Values missing from the file fall back to an explicit default given to the
//! getter, then to the defaults the `Config` was built with.
use json::JsonValue;
use log::{info, warn};
use regex::Regex;
use std::{
    error::Error,
    fmt,
    fs::File,
    io::{ErrorKind, Write},
    path::Path,
};

#[derive(Debug)]
pub struct MissingConfigError {
    key: String,
}

impl fmt::Display for MissingConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Required configuration value '{}' is missing", self.key)
    }
}

impl Error for MissingConfigError {}

pub struct Config {
    filename: String,
    settings: JsonValue,
    defaults: JsonValue,
}

impl Config {
    pub fn build(filename: String, defaults: JsonValue) -> Result<Config, std::io::Error> {
        // the file name itself may only contain letters, numbers, underscore, dash, dot and end in .json
        let filename_regex = Regex::new(r"^[a-zA-Z0-9_\-\.]+\.json$")
            .map_err(|e| std::io::Error::new(ErrorKind::Other, e))?;
        let base = Path::new(&filename)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("");
        if !filename_regex.is_match(base) {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                "Invalid filename - must contain only letters, numbers, underscore, dash, dot and end in .json"
            ));
        }

        let mut config = Config {
            filename,
            settings: json::object! {},
            defaults,
        };

        if let Err(err) = config.load_from_file() {
            warn!("Using default settings: {}", err);
        }

        Ok(config)
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    fn load_from_file(&mut self) -> std::io::Result<()> {
        let raw_data = std::fs::read_to_string(&self.filename)?;
        match json::parse(&raw_data) {
            Ok(parsed) => {
                self.settings = parsed;
                info!("Loaded settings from {}: {}", self.filename, self.settings.dump());
            }
            Err(err) => {
                warn!("Failed to parse config file {}: {}", self.filename, err);
            }
        }
        Ok(())
    }

    fn lookup<V>(
        &self,
        key: &str,
        default: Option<V>,
        get: impl Fn(&JsonValue) -> Option<V>,
    ) -> Result<V, MissingConfigError> {
        if let Some(val) = get(&self.settings[key]) {
            return Ok(val);
        }
        if let Some(def) = default {
            return Ok(def);
        }
        get(&self.defaults[key]).ok_or_else(|| MissingConfigError {
            key: key.to_string(),
        })
    }

    pub fn get_str_value(&self, key: &str, default: Option<String>) -> Result<String, MissingConfigError> {
        self.lookup(key, default, |v| v.as_str().map(String::from))
    }

    pub fn get_bool_value(&self, key: &str, default: Option<bool>) -> Result<bool, MissingConfigError> {
        self.lookup(key, default, |v| v.as_bool())
    }

    pub fn get_u32_value(&self, key: &str, default: Option<u32>) -> Result<u32, MissingConfigError> {
        self.lookup(key, default, |v| v.as_u32())
    }

    pub fn get_f32_value(&self, key: &str, default: Option<f32>) -> Result<f32, MissingConfigError> {
        self.lookup(key, default, |v| v.as_f32())
    }

    pub fn set_value(&mut self, key: &str, val: impl Into<JsonValue>) -> Result<(), String> {
        let json_val = val.into();
        match json_val {
            JsonValue::Short(_) | JsonValue::String(_) | JsonValue::Boolean(_) | JsonValue::Number(_) => {
                self.settings[key] = json_val;
                Ok(())
            }
            _ => Err(format!("Unsupported value type for key: {}", key)),
        }
    }

    pub fn save_settings(&self) -> std::io::Result<()> {
        let mut f = File::create(&self.filename)?;
        f.write_all(self.settings.pretty(2).as_bytes())?;
        f.sync_all()
    }
}

#[cfg(test)]
mod test_config {
    use super::*;

    fn test_defaults() -> JsonValue {
        json::object! {
            "interface": "127.0.0.1",
            "daemon": false,
            "port": 33337,
            "gain_db": -6.0
        }
    }

    fn test_config(filename: &str) -> Config {
        match Config::build(filename.to_string(), test_defaults()) {
            Ok(config) => config,
            Err(e) => panic!("Failed to build config: {}", e),
        }
    }

    #[test]
    fn should_build_with_any_valid_name() {
        let config = test_config("no_such_settings.json");
        assert_eq!(config.filename(), "no_such_settings.json");
    }

    #[test]
    fn should_error_with_invalid_name() {
        let boom = Config::build("I'm_;,`all_{jacked}_up".to_string(), test_defaults());
        match boom {
            Ok(_) => panic!("Expected error for invalid filename"),
            Err(e) => assert_eq!(e.kind(), ErrorKind::InvalidInput),
        }
        assert!(Config::build("settings.txt".to_string(), test_defaults()).is_err());
    }

    #[test]
    fn directory_part_is_not_checked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("host-settings.json");
        let config = test_config(path.to_str().unwrap());
        assert_eq!(config.get_u32_value("port", None).unwrap(), 33337);
    }

    #[test]
    fn should_get_defaults_with_no_file() {
        let config = test_config("no_such_settings.json");
        assert_eq!(config.get_str_value("interface", None).unwrap(), "127.0.0.1");
        assert!(!config.get_bool_value("daemon", None).unwrap());
        assert_eq!(config.get_u32_value("port", None).unwrap(), 33337);
        assert_eq!(config.get_f32_value("gain_db", None).unwrap(), -6.0);
    }

    #[test]
    fn explicit_default_wins_over_built_in() {
        let config = test_config("no_such_settings.json");
        assert_eq!(config.get_u32_value("port", Some(9)).unwrap(), 9);
        assert_eq!(
            config.get_str_value("i_dont_exist", Some("fallback".to_string())).unwrap(),
            "fallback"
        );
    }

    #[test]
    fn missing_key_is_an_error() {
        let config = test_config("no_such_settings.json");
        let boom = config.get_bool_value("i_dont_exist", None);
        assert_eq!(
            boom.unwrap_err().to_string(),
            "Required configuration value 'i_dont_exist' is missing"
        );
    }

    #[test]
    fn set_value_overrides() {
        let mut config = test_config("no_such_settings.json");
        config.set_value("port", 4000).unwrap();
        assert_eq!(config.get_u32_value("port", Some(1)).unwrap(), 4000);
        let res = config.set_value("list", json::array!["a", "b"]);
        assert_eq!(res.unwrap_err(), "Unsupported value type for key: list");
    }

    #[test]
    fn saved_settings_load_again() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("saved.json");
        let name = path.to_str().unwrap().to_string();
        let mut config = test_config(&name);
        config.set_value("interface", "0.0.0.0").unwrap();
        config.set_value("port", 5000).unwrap();
        config.save_settings().unwrap();

        let reloaded = test_config(&name);
        assert_eq!(reloaded.get_str_value("interface", None).unwrap(), "0.0.0.0");
        assert_eq!(reloaded.get_u32_value("port", None).unwrap(), 5000);
    }

    #[test]
    fn broken_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();
        let config = test_config(path.to_str().unwrap());
        assert_eq!(config.get_u32_value("port", None).unwrap(), 33337);
    }
}
