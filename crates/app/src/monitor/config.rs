use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OracleKind {
    /// No model wired up: every frame yields an empty detection set.
    Stub,
    /// Scripted detection sets that alternate healthy and high-density
    /// readings, for running the full pipeline without hardware.
    Demo,
}

#[derive(Clone, Debug)]
pub struct MonitorConfig {
    pub source: String,
    pub width: i32,
    pub height: i32,
    pub jpeg_quality: i32,
    pub roi_area_cm2: f64,
    pub avg_larva_area_px: f64,
    pub min_mask_area_px: f64,
    pub density_threshold: f64,
    pub cooldown: Duration,
    pub alert_interval: Duration,
    pub stats_interval: Duration,
    pub frame_interval: Duration,
    pub port: u16,
    pub oracle: OracleKind,
    pub verbose: bool,
}

const MONITOR_USAGE: &str = "Usage: larva-monitor [--source <uri>] [--width <px>] [--height <px>] \
[--jpeg-quality <1-100>] [--roi-area-cm2 <cm2>] [--avg-larva-area-px <px>] \
[--min-mask-area-px <px>] [--density-threshold <larvae-per-cm2>] \
[--cooldown-secs <s>] [--alert-interval-secs <s>] [--stats-interval-ms <ms>] \
[--frame-interval-ms <ms>] [--port <port>] [--oracle <stub|demo>] [--verbose]\n\n\
Sources: a device index or /dev/videoN path (requires the capture-opencv \
feature), a video file path, `synthetic:` for an endless generated feed, or \
`synthetic:<frames>` for a loopable generated clip.";

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            source: "synthetic:".to_string(),
            width: 640,
            height: 480,
            jpeg_quality: 60,
            roi_area_cm2: 413.0,
            avg_larva_area_px: 386.0,
            min_mask_area_px: 50.0,
            density_threshold: 1.25,
            cooldown: Duration::from_secs(300),
            alert_interval: Duration::from_secs(30),
            stats_interval: Duration::from_millis(100),
            frame_interval: Duration::from_millis(33),
            port: 8000,
            oracle: OracleKind::Stub,
            verbose: false,
        }
    }
}

impl MonitorConfig {
    pub fn from_args(args: &[String]) -> Result<Self> {
        let mut config = Self::default();

        let mut idx = 1;
        while idx < args.len() {
            match args[idx].as_str() {
                "--help" | "-h" => bail!(MONITOR_USAGE),
                "--source" => {
                    idx += 1;
                    config.source = args
                        .get(idx)
                        .ok_or_else(|| anyhow!("--source requires a value"))?
                        .clone();
                    idx += 1;
                }
                "--width" => {
                    idx += 1;
                    config.width = parse_value(args, idx, "--width")?;
                    idx += 1;
                }
                "--height" => {
                    idx += 1;
                    config.height = parse_value(args, idx, "--height")?;
                    idx += 1;
                }
                "--jpeg-quality" => {
                    idx += 1;
                    config.jpeg_quality = parse_value(args, idx, "--jpeg-quality")?;
                    idx += 1;
                }
                "--roi-area-cm2" => {
                    idx += 1;
                    config.roi_area_cm2 = parse_value(args, idx, "--roi-area-cm2")?;
                    idx += 1;
                }
                "--avg-larva-area-px" => {
                    idx += 1;
                    config.avg_larva_area_px = parse_value(args, idx, "--avg-larva-area-px")?;
                    idx += 1;
                }
                "--min-mask-area-px" => {
                    idx += 1;
                    config.min_mask_area_px = parse_value(args, idx, "--min-mask-area-px")?;
                    idx += 1;
                }
                "--density-threshold" => {
                    idx += 1;
                    config.density_threshold = parse_value(args, idx, "--density-threshold")?;
                    idx += 1;
                }
                "--cooldown-secs" => {
                    idx += 1;
                    config.cooldown = Duration::from_secs(parse_value(args, idx, "--cooldown-secs")?);
                    idx += 1;
                }
                "--alert-interval-secs" => {
                    idx += 1;
                    config.alert_interval =
                        Duration::from_secs(parse_value(args, idx, "--alert-interval-secs")?);
                    idx += 1;
                }
                "--stats-interval-ms" => {
                    idx += 1;
                    config.stats_interval =
                        Duration::from_millis(parse_value(args, idx, "--stats-interval-ms")?);
                    idx += 1;
                }
                "--frame-interval-ms" => {
                    idx += 1;
                    config.frame_interval =
                        Duration::from_millis(parse_value(args, idx, "--frame-interval-ms")?);
                    idx += 1;
                }
                "--port" => {
                    idx += 1;
                    config.port = parse_value(args, idx, "--port")?;
                    idx += 1;
                }
                "--oracle" => {
                    idx += 1;
                    let value = args
                        .get(idx)
                        .ok_or_else(|| anyhow!("--oracle requires a value"))?;
                    config.oracle = match value.as_str() {
                        "stub" => OracleKind::Stub,
                        "demo" => OracleKind::Demo,
                        other => bail!("unknown oracle {other:?}; expected stub or demo"),
                    };
                    idx += 1;
                }
                "--verbose" => {
                    config.verbose = true;
                    idx += 1;
                }
                arg => bail!("Unrecognised flag: {arg}\n\n{MONITOR_USAGE}"),
            }
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.width <= 0 || self.height <= 0 {
            bail!("--width and --height must be positive");
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            bail!("--jpeg-quality must be between 1 and 100");
        }
        if self.roi_area_cm2 <= 0.0 {
            bail!("--roi-area-cm2 must be positive");
        }
        if self.avg_larva_area_px <= 0.0 {
            bail!("--avg-larva-area-px must be positive");
        }
        if self.min_mask_area_px < 0.0 {
            bail!("--min-mask-area-px must not be negative");
        }
        if self.density_threshold < 0.0 {
            bail!("--density-threshold must not be negative");
        }
        if self.alert_interval.is_zero() || self.stats_interval.is_zero() {
            bail!("--alert-interval-secs and --stats-interval-ms must be positive");
        }
        Ok(())
    }
}

fn parse_value<T: std::str::FromStr>(args: &[String], idx: usize, flag: &str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    args.get(idx)
        .ok_or_else(|| anyhow!("{flag} requires a value"))?
        .parse::<T>()
        .with_context(|| format!("{flag} has an invalid value"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("larva-monitor")
            .chain(list.iter().copied())
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn defaults_match_original_constants() {
        let config = MonitorConfig::from_args(&args(&[])).expect("defaults parse");
        assert_eq!(config.roi_area_cm2, 413.0);
        assert_eq!(config.avg_larva_area_px, 386.0);
        assert_eq!(config.min_mask_area_px, 50.0);
        assert_eq!(config.density_threshold, 1.25);
        assert_eq!((config.width, config.height), (640, 480));
        assert_eq!(config.port, 8000);
    }

    #[test]
    fn flags_override_defaults() {
        let config = MonitorConfig::from_args(&args(&[
            "--source",
            "synthetic:10",
            "--density-threshold",
            "2.5",
            "--cooldown-secs",
            "60",
            "--oracle",
            "demo",
        ]))
        .expect("flags parse");
        assert_eq!(config.source, "synthetic:10");
        assert_eq!(config.density_threshold, 2.5);
        assert_eq!(config.cooldown, Duration::from_secs(60));
        assert_eq!(config.oracle, OracleKind::Demo);
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(MonitorConfig::from_args(&args(&["--jpeg-quality", "0"])).is_err());
        assert!(MonitorConfig::from_args(&args(&["--roi-area-cm2", "-1"])).is_err());
        assert!(MonitorConfig::from_args(&args(&["--oracle", "onnx"])).is_err());
        assert!(MonitorConfig::from_args(&args(&["--mystery"])).is_err());
    }
}
