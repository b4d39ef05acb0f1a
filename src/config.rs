use arc_swap::{ArcSwap, Guard};
use bevy::ecs::resource::Resource;
use bevy::math::IVec2;
use serde::Deserialize;
use std::{
    env,
    fs::read_to_string,
    path::{Path, PathBuf},
    sync::{Arc, LazyLock},
};
use stdext::function_name;
use tracing::warn;

use crate::commands::{Command, Inject};
use crate::engine::{DetectorOptions, DisplayTopology, FocusTuning, ScreenEntry, ScreenId};
use crate::errors::{Error, Result};

/// A `LazyLock` that determines the path to the application's configuration
/// file. It checks the `SPOTCAST_CONFIG` environment variable first, then
/// standard XDG locations and the user's home directory. The daemon runs on
/// built-in defaults when no file is found.
pub static CONFIGURATION_FILE: LazyLock<Option<PathBuf>> = LazyLock::new(|| {
    if let Ok(path_str) = env::var("SPOTCAST_CONFIG") {
        let path = PathBuf::from(path_str);
        if path.exists() {
            return Some(path);
        }
        warn!(
            "{}: $SPOTCAST_CONFIG is set to {}, but the file does not exist. Falling back to default locations.",
            function_name!(),
            path.display()
        );
    }

    let standard_paths = [
        env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join(".spotcast")),
        env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join(".spotcast.toml")),
        env::var("XDG_CONFIG_HOME")
            .ok()
            .map(|x| PathBuf::from(x).join("spotcast/spotcast.toml")),
    ];

    standard_paths
        .into_iter()
        .flatten()
        .find(|path| path.exists())
});

/// Parses a screen-id argument.
fn parse_screen(arg: Option<&&str>) -> Result<ScreenId> {
    let err = || {
        Error::InvalidConfig(format!(
            "{}: expected a numeric screen id, got {arg:?}",
            function_name!()
        ))
    };
    arg.and_then(|raw| raw.parse::<u32>().ok())
        .map(ScreenId)
        .ok_or_else(err)
}

/// Parses an `x y` coordinate pair.
fn parse_point(argv: &[&str]) -> Result<IVec2> {
    let err = || {
        Error::InvalidConfig(format!(
            "{}: expected 'X Y' coordinates, got {argv:?}",
            function_name!()
        ))
    };
    let x = argv.first().and_then(|raw| raw.parse::<i32>().ok());
    let y = argv.get(1).and_then(|raw| raw.parse::<i32>().ok());
    x.zip(y)
        .map(|(x, y)| IVec2::new(x, y))
        .ok_or_else(err)
}

/// Parses the argument vector of an `inject` command into an `Inject`.
fn parse_inject(argv: &[&str]) -> Result<Inject> {
    let empty = "";
    let cmd = *argv.first().unwrap_or(&empty);

    let out = match cmd {
        "click" => Inject::Click {
            point: parse_point(&argv[1..])?,
            double: argv.get(3).copied() == Some("double"),
        },
        "move" => Inject::Move {
            point: parse_point(&argv[1..])?,
        },
        "scroll" => Inject::Scroll {
            point: parse_point(&argv[1..])?,
        },
        "type" => Inject::Typing,
        "focus-window" => Inject::FocusWindow {
            screen: parse_screen(argv.get(1))?,
        },
        _ => {
            return Err(Error::InvalidConfig(format!(
                "{}: Unhandled injection '{argv:?}'",
                function_name!()
            )));
        }
    };
    Ok(out)
}

/// Parses a command argument vector into a `Command` enum.
///
/// # Arguments
///
/// * `argv` - A slice of strings representing the command arguments
///   (e.g., `["select", "2"]`).
///
/// # Returns
///
/// `Ok(Command)` if the arguments represent a valid command, otherwise
/// `Err(Error::InvalidConfig)`.
pub fn parse_command(argv: &[&str]) -> Result<Command> {
    let empty = "";
    let cmd = *argv.first().unwrap_or(&empty);

    let out = match cmd {
        "auto" => Command::Auto,
        "freeze" => Command::Freeze,
        "select" => Command::Select(parse_screen(argv.get(1))?),
        "clear" => Command::ClearSelection,
        "join" => Command::Join(
            argv.get(1)
                .map(|name| (*name).to_string())
                .ok_or_else(|| {
                    Error::InvalidConfig(format!(
                        "{}: 'join' needs a viewer name",
                        function_name!()
                    ))
                })?,
        ),
        "inject" => Command::Inject(parse_inject(&argv[1..])?),
        "state" => Command::PrintState,
        "quit" => Command::Quit,
        _ => {
            return Err(Error::InvalidConfig(format!(
                "{}: Unhandled command '{argv:?}'",
                function_name!()
            )));
        }
    };
    Ok(out)
}

/// `Config` manages the daemon's configuration: focus tuning, detector
/// options, the display layout, and session identity. Reads are lock-free;
/// reloads swap the whole inner record atomically.
#[derive(Clone, Debug, Resource)]
pub struct Config {
    inner: Arc<ArcSwap<InnerConfig>>,
}

impl Config {
    /// Loads and validates the configuration from `path`.
    pub fn new(path: &Path) -> Result<Self> {
        let input = read_to_string(path)?;
        Ok(Config {
            inner: Arc::new(ArcSwap::from_pointee(InnerConfig::new(&input)?)),
        })
    }

    /// Reloads the configuration from `path`, swapping atomically. A file
    /// that fails validation leaves the previous configuration in place.
    pub fn reload_config(&self, path: &Path) -> Result<()> {
        let input = read_to_string(path)?;
        let new = InnerConfig::new(&input)?;
        self.inner.store(Arc::new(new));
        Ok(())
    }

    fn inner(&self) -> Guard<Arc<InnerConfig>> {
        self.inner.load()
    }

    /// Focus tuning assembled from the file over the authoritative
    /// defaults. Already validated at parse time.
    pub fn tuning(&self) -> FocusTuning {
        self.inner().tuning()
    }

    /// Detector options assembled from the file over the defaults.
    pub fn detector_options(&self) -> DetectorOptions {
        self.inner().detector_options()
    }

    /// The configured display layout.
    pub fn screens(&self) -> Vec<ScreenEntry> {
        self.inner().displays.clone()
    }

    /// Builds and validates the topology from the configured layout.
    pub fn topology(&self) -> Result<DisplayTopology> {
        let inner = self.inner();
        DisplayTopology::from_entries(&inner.displays, inner.tuning().max_screens)
    }

    /// Explicitly pinned session id, if any.
    pub fn session_id(&self) -> Option<String> {
        self.inner().session.id.clone()
    }
}

impl Default for Config {
    /// A default `Config`: authoritative tuning defaults and a single
    /// 1920x1080 display.
    fn default() -> Self {
        Config {
            inner: Arc::new(ArcSwap::from_pointee(InnerConfig::default())),
        }
    }
}

impl TryFrom<&str> for Config {
    type Error = crate::errors::Error;

    fn try_from(input: &str) -> std::result::Result<Self, Self::Error> {
        Ok(Config {
            inner: Arc::new(ArcSwap::from_pointee(InnerConfig::new(input)?)),
        })
    }
}

/// `InnerConfig` holds the configuration data parsed from a file. It is
/// accessed through the `ArcSwap` inside `Config`.
#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
struct InnerConfig {
    #[serde(default)]
    options: MainOptions,
    #[serde(default = "default_displays")]
    displays: Vec<ScreenEntry>,
    #[serde(default)]
    session: SessionOptions,
}

impl Default for InnerConfig {
    fn default() -> Self {
        InnerConfig {
            options: MainOptions::default(),
            displays: default_displays(),
            session: SessionOptions::default(),
        }
    }
}

fn default_displays() -> Vec<ScreenEntry> {
    vec![ScreenEntry {
        id: 1,
        x: 0,
        y: 0,
        width: 1920,
        height: 1080,
        scale: 1.0,
    }]
}

impl InnerConfig {
    /// Parses and validates a configuration. Validation covers the focus
    /// tuning, detector options and the display layout, so an engine built
    /// from an accepted configuration cannot fail construction.
    fn new(input: &str) -> Result<InnerConfig> {
        let config: InnerConfig = toml::from_str(input)?;
        let tuning = config.tuning();
        tuning.validate()?;
        config.detector_options().validate()?;
        DisplayTopology::from_entries(&config.displays, tuning.max_screens)?;
        Ok(config)
    }

    fn tuning(&self) -> FocusTuning {
        let defaults = FocusTuning::default();
        let o = &self.options;
        FocusTuning {
            max_screens: o.max_screens.unwrap_or(defaults.max_screens),
            switch_threshold: o.switch_threshold.unwrap_or(defaults.switch_threshold),
            stay_threshold: o.stay_threshold.unwrap_or(defaults.stay_threshold),
            cooldown_ms: o.cooldown_ms.unwrap_or(defaults.cooldown_ms),
            idle_ms: o.idle_ms.unwrap_or(defaults.idle_ms),
            click_dwell_ms: o.click_dwell_ms.unwrap_or(defaults.click_dwell_ms),
            typing_dwell_ms: o.typing_dwell_ms.unwrap_or(defaults.typing_dwell_ms),
            scroll_dwell_ms: o.scroll_dwell_ms.unwrap_or(defaults.scroll_dwell_ms),
            hover_dwell_ms: o.hover_dwell_ms.unwrap_or(defaults.hover_dwell_ms),
            movement_dwell_ms: o.movement_dwell_ms.unwrap_or(defaults.movement_dwell_ms),
            movement_speed_high_px_s: o
                .movement_speed_high_px_s
                .unwrap_or(defaults.movement_speed_high_px_s),
            resume_grace_ms: o.resume_grace_ms.unwrap_or(defaults.resume_grace_ms),
        }
    }

    fn detector_options(&self) -> DetectorOptions {
        let defaults = DetectorOptions::default();
        let o = &self.options;
        DetectorOptions {
            poll_interval_ms: o
                .cursor_poll_interval_ms
                .unwrap_or(defaults.poll_interval_ms),
            movement_threshold_px: o
                .movement_threshold_px
                .unwrap_or(defaults.movement_threshold_px),
            hover_radius_px: o.hover_radius_px.unwrap_or(defaults.hover_radius_px),
            hover_threshold_ms: o.hover_threshold_ms.unwrap_or(defaults.hover_threshold_ms),
            idle_motion_px_s: o.idle_motion_px_s.unwrap_or(defaults.idle_motion_px_s),
        }
    }
}

/// `MainOptions` mirrors the `[options]` table. Every knob is optional;
/// unset values fall back to the authoritative defaults.
#[derive(Deserialize, Clone, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct MainOptions {
    /// Upper bound on the number of shared displays.
    pub max_screens: Option<usize>,
    /// Confidence needed to switch to another display.
    pub switch_threshold: Option<f64>,
    /// Confidence needed to refresh the current display's standing.
    pub stay_threshold: Option<f64>,
    pub cooldown_ms: Option<u64>,
    pub idle_ms: Option<u64>,
    pub click_dwell_ms: Option<u64>,
    pub typing_dwell_ms: Option<u64>,
    pub scroll_dwell_ms: Option<u64>,
    pub hover_dwell_ms: Option<u64>,
    pub movement_dwell_ms: Option<u64>,
    /// Pointer speed treated as cross-display transit.
    pub movement_speed_high_px_s: Option<f64>,
    /// Cooldown window opened when a freeze is lifted.
    pub resume_grace_ms: Option<u64>,
    /// Cursor poll period of the intent detector.
    pub cursor_poll_interval_ms: Option<u64>,
    pub movement_threshold_px: Option<f64>,
    pub hover_radius_px: Option<f64>,
    pub hover_threshold_ms: Option<u64>,
    /// Speed floor below which cursor travel is ignored as drift.
    pub idle_motion_px_s: Option<f64>,
}

/// The `[session]` table.
#[derive(Deserialize, Clone, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct SessionOptions {
    /// Pins the session id; generated from the wall clock when unset.
    pub id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_parsing() {
        let input = r#"
[options]
switch_threshold = 0.9
cooldown_ms = 700
hover_radius_px = 12.0

[session]
id = "demo"

[[displays]]
id = 1
x = 0
y = 0
width = 2560
height = 1440

[[displays]]
id = 2
x = 2560
y = 0
width = 1920
height = 1080
scale = 2.0
"#;
        let config = Config::try_from(input).expect("Failed to parse config");

        let tuning = config.tuning();
        assert!((tuning.switch_threshold - 0.9).abs() < f64::EPSILON);
        assert_eq!(tuning.cooldown_ms, 700);
        // Unset knobs keep their authoritative defaults.
        assert_eq!(tuning.idle_ms, 2000);
        assert!((tuning.stay_threshold - 0.5).abs() < f64::EPSILON);

        let detector = config.detector_options();
        assert!((detector.hover_radius_px - 12.0).abs() < f64::EPSILON);
        assert_eq!(detector.poll_interval_ms, 50);

        assert_eq!(config.session_id().as_deref(), Some("demo"));

        let screens = config.screens();
        assert_eq!(screens.len(), 2);
        assert!((screens[1].scale - 2.0).abs() < f64::EPSILON);
        assert!(config.topology().is_ok());
    }

    #[test]
    fn test_config_rejects_bad_tuning() {
        let inverted = r#"
[options]
switch_threshold = 0.3
stay_threshold = 0.5
"#;
        assert!(Config::try_from(inverted).is_err());

        let overlapping = r#"
[[displays]]
id = 1
x = 0
y = 0
width = 1920
height = 1080

[[displays]]
id = 2
x = 100
y = 0
width = 1920
height = 1080
"#;
        assert!(Config::try_from(overlapping).is_err());
    }

    #[test]
    fn test_reload_keeps_previous_on_error() {
        let config = Config::default();
        assert_eq!(config.tuning().cooldown_ms, 500);
        // Reloading from a missing path fails and changes nothing.
        assert!(config.reload_config(Path::new("/nonexistent/spotcast.toml")).is_err());
        assert_eq!(config.tuning().cooldown_ms, 500);
    }

    #[test]
    fn test_command_parsing() {
        assert_eq!(parse_command(&["auto"]).unwrap(), Command::Auto);
        assert_eq!(parse_command(&["freeze"]).unwrap(), Command::Freeze);
        assert_eq!(
            parse_command(&["select", "2"]).unwrap(),
            Command::Select(ScreenId(2))
        );
        assert_eq!(parse_command(&["clear"]).unwrap(), Command::ClearSelection);
        assert_eq!(
            parse_command(&["join", "alice"]).unwrap(),
            Command::Join("alice".into())
        );
        assert_eq!(parse_command(&["state"]).unwrap(), Command::PrintState);
        assert_eq!(parse_command(&["quit"]).unwrap(), Command::Quit);

        assert!(parse_command(&["select"]).is_err());
        assert!(parse_command(&["select", "two"]).is_err());
        assert!(parse_command(&["frobnicate"]).is_err());
        assert!(parse_command(&[]).is_err());
    }

    #[test]
    fn test_inject_parsing() {
        assert_eq!(
            parse_command(&["inject", "click", "2500", "400"]).unwrap(),
            Command::Inject(Inject::Click {
                point: IVec2::new(2500, 400),
                double: false,
            })
        );
        assert_eq!(
            parse_command(&["inject", "click", "10", "20", "double"]).unwrap(),
            Command::Inject(Inject::Click {
                point: IVec2::new(10, 20),
                double: true,
            })
        );
        assert_eq!(
            parse_command(&["inject", "move", "-5", "40"]).unwrap(),
            Command::Inject(Inject::Move {
                point: IVec2::new(-5, 40),
            })
        );
        assert_eq!(
            parse_command(&["inject", "type"]).unwrap(),
            Command::Inject(Inject::Typing)
        );
        assert_eq!(
            parse_command(&["inject", "focus-window", "3"]).unwrap(),
            Command::Inject(Inject::FocusWindow {
                screen: ScreenId(3),
            })
        );
        assert!(parse_command(&["inject", "click", "10"]).is_err());
        assert!(parse_command(&["inject"]).is_err());
    }
}
