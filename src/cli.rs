use crate::config::EngineConfigOverrides;
use crate::logging::LogLevel;
use anyhow::{anyhow, bail, Context, Result};
use std::env;
use std::path::PathBuf;

const SUPPORTED_FLAGS: &str =
    "--config, --assets, --width, --height, --frames-in-flight, --validation, --log-level";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CliOverrides {
    config_path: Option<PathBuf>,
    asset_root: Option<PathBuf>,
    width: Option<u32>,
    height: Option<u32>,
    frames_in_flight: Option<usize>,
    validation: Option<bool>,
    log_level: Option<LogLevel>,
}

impl CliOverrides {
    pub fn parse_from_env() -> Result<Self> {
        Self::parse(env::args())
    }

    pub fn parse<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut overrides = CliOverrides::default();
        let mut iter = args.into_iter();
        let _ = iter.next(); // program name
        while let Some(raw_flag) = iter.next() {
            let flag = raw_flag.as_ref();
            let Some(key) = flag.strip_prefix("--") else {
                bail!("Unexpected argument '{flag}'. Supported flags: {SUPPORTED_FLAGS}.");
            };
            let value =
                iter.next().ok_or_else(|| anyhow!("Expected a value after '{flag}'"))?.as_ref().to_string();
            match key {
                "config" => overrides.config_path = Some(PathBuf::from(value)),
                "assets" => overrides.asset_root = Some(PathBuf::from(value)),
                "width" => {
                    overrides.width =
                        Some(value.parse::<u32>().with_context(|| format!("Invalid width '{value}'"))?);
                }
                "height" => {
                    overrides.height =
                        Some(value.parse::<u32>().with_context(|| format!("Invalid height '{value}'"))?);
                }
                "frames-in-flight" => {
                    let frames = value
                        .parse::<usize>()
                        .with_context(|| format!("Invalid frames-in-flight '{value}'"))?;
                    if frames == 0 {
                        bail!("frames-in-flight must be at least 1");
                    }
                    overrides.frames_in_flight = Some(frames);
                }
                "validation" => overrides.validation = Some(parse_bool_flag("validation", &value)?),
                "log-level" => {
                    overrides.log_level = Some(value.parse::<LogLevel>().map_err(|err| anyhow!(err))?);
                }
                _ => bail!("Unknown flag '{flag}'. Supported flags: {SUPPORTED_FLAGS}."),
            }
        }
        Ok(overrides)
    }

    pub fn config_path(&self) -> Option<&PathBuf> {
        self.config_path.as_ref()
    }

    pub fn into_config_overrides(self) -> EngineConfigOverrides {
        EngineConfigOverrides {
            width: self.width,
            height: self.height,
            asset_root: self.asset_root,
            frames_in_flight: self.frames_in_flight,
            validation: self.validation,
            log_level: self.log_level,
        }
    }
}

fn parse_bool_flag(flag: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" => Ok(false),
        other => bail!("Invalid {flag} value '{other}'. Use on/off or true/false."),
    }
}
