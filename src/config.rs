//! Application-level configuration loading: race sequences, grid sizes, default
//! points matrices, bonus award values and rosters of both phases.

use std::{
    collections::{BTreeMap, BTreeSet},
    env, fs,
    io::ErrorKind,
    path::PathBuf,
};

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::state::{
    points::PointsMatrix,
    race::{Phase, PilotId, Race, RaceKind, RaceSequence, RankMap},
};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "RACE_CONTROL_CONFIG_PATH";

const PUBLIC_VOTE: &str = "public_vote";
const JURY_VOTE: &str = "jury_vote";
const DEFAULT_AWARD_POINTS: i32 = 10;

/// Errors raised while turning a configuration document into an [`AppConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration JSON")]
    Parse(#[from] serde_json::Error),
    #[error("invalid settings for phase {phase}: {reason}")]
    InvalidPhase { phase: Phase, reason: String },
}

/// Static settings of one phase.
#[derive(Debug, Clone)]
pub struct PhaseSettings {
    pub phase: Phase,
    /// Number of distinct ranks a race needs to be complete.
    pub grid_size: u32,
    pub sequence: RaceSequence,
    /// Matrix seeded into the store when it holds none.
    pub default_matrix: PointsMatrix,
    /// Fixed points of each bonus award name.
    pub award_values: BTreeMap<String, i32>,
    /// Accepted pilots. Empty means everybody is accepted.
    pub roster: BTreeSet<PilotId>,
}

impl PhaseSettings {
    /// Built-in settings of `phase`.
    pub fn defaults(phase: Phase) -> Self {
        Self {
            phase,
            grid_size: default_grid_size(phase),
            sequence: default_sequence(phase),
            default_matrix: PointsMatrix::default_for(phase),
            award_values: default_award_values(),
            roster: BTreeSet::new(),
        }
    }

    /// Whether `pilot_id` may submit ranks in this phase.
    pub fn accepts_pilot(&self, pilot_id: &str) -> bool {
        self.roster.is_empty() || self.roster.contains(pilot_id)
    }

    /// Drop every entry of `ranks` whose pilot is not on the roster.
    pub fn filter_roster(&self, mut ranks: RankMap) -> RankMap {
        if !self.roster.is_empty() {
            ranks.retain(|pilot, _| self.roster.contains(pilot));
        }
        ranks
    }
}

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    phases: BTreeMap<Phase, PhaseSettings>,
}

impl AppConfig {
    /// Load the configuration from disk, falling back to the built-in tournament layout.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match Self::from_json(&contents) {
                Ok(config) => {
                    info!(
                        path = %path.display(),
                        races_a = config.phase(Phase::A).sequence.len(),
                        races_b = config.phase(Phase::B).sequence.len(),
                        "loaded tournament configuration"
                    );
                    config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Parse a JSON configuration document. Phases it omits keep their defaults.
    pub fn from_json(contents: &str) -> Result<Self, ConfigError> {
        let raw = serde_json::from_str::<RawConfig>(contents)?;
        let mut phases = BTreeMap::new();
        for phase in Phase::ALL {
            let settings = match raw.phases.get(&phase) {
                Some(raw_phase) => raw_phase.clone().into_settings(phase)?,
                None => PhaseSettings::defaults(phase),
            };
            phases.insert(phase, settings);
        }
        Ok(Self { phases })
    }

    /// Settings of `phase`. Every phase is always configured.
    pub fn phase(&self, phase: Phase) -> &PhaseSettings {
        &self.phases[&phase]
    }

    /// Replace the settings of one phase.
    pub fn with_phase(mut self, settings: PhaseSettings) -> Self {
        self.phases.insert(settings.phase, settings);
        self
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            phases: Phase::ALL
                .into_iter()
                .map(|phase| (phase, PhaseSettings::defaults(phase)))
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    #[serde(default)]
    phases: BTreeMap<Phase, RawPhase>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPhase {
    grid_size: Option<u32>,
    races: Option<Vec<Race>>,
    points_matrix: Option<PointsMatrix>,
    awards: Option<BTreeMap<String, i32>>,
    #[serde(default)]
    roster: BTreeSet<PilotId>,
}

impl RawPhase {
    fn into_settings(self, phase: Phase) -> Result<PhaseSettings, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidPhase { phase, reason };
        let defaults = PhaseSettings::defaults(phase);

        let grid_size = self.grid_size.unwrap_or(defaults.grid_size);
        if grid_size == 0 {
            return Err(invalid("grid size must be positive".into()));
        }

        let sequence = match self.races {
            Some(races) if races.is_empty() => {
                return Err(invalid("race sequence is empty".into()));
            }
            Some(races) => RaceSequence::new(races).map_err(invalid)?,
            None => defaults.sequence,
        };

        if !self.roster.is_empty() && self.roster.len() < grid_size as usize {
            return Err(invalid(format!(
                "roster lists {} pilots but a race needs {grid_size}",
                self.roster.len()
            )));
        }

        let default_matrix = self.points_matrix.unwrap_or(defaults.default_matrix);
        if let Some((rank, points)) = default_matrix.out_of_bounds_cell() {
            return Err(invalid(format!(
                "points matrix gives {points} points to rank {rank}"
            )));
        }

        Ok(PhaseSettings {
            phase,
            grid_size,
            sequence,
            default_matrix,
            award_values: self.awards.unwrap_or(defaults.award_values),
            roster: self.roster,
        })
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

fn default_grid_size(phase: Phase) -> u32 {
    match phase {
        Phase::A => 12,
        Phase::B => 24,
    }
}

fn default_sequence(phase: Phase) -> RaceSequence {
    let normal_races = match phase {
        Phase::A => 10,
        Phase::B => 8,
    };
    let mut races = (1..=normal_races)
        .map(|index: u32| Race::new(index.to_string(), RaceKind::Normal))
        .collect::<Vec<_>>();
    if phase == Phase::B {
        races.push(Race::new("survival-1", RaceKind::SurvivalStage1));
        races.push(Race::new("survival-final", RaceKind::SurvivalFinal));
    }
    // Built-in keys are distinct and slash free.
    RaceSequence::new(races).unwrap_or_else(|err| unreachable!("{err}"))
}

fn default_award_values() -> BTreeMap<String, i32> {
    BTreeMap::from([
        (PUBLIC_VOTE.to_string(), DEFAULT_AWARD_POINTS),
        (JURY_VOTE.to_string(), DEFAULT_AWARD_POINTS),
    ])
}
