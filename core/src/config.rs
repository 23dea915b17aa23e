use crate::removal::RemovalPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributionConfig {
    pub removal_policy:    RemovalPolicy,
    pub parallel_channels: bool,
    /// Graph edges at or below this probability are not exported.
    pub edge_threshold:    f64,
    /// How many of the most frequent journey paths a report lists.
    pub top_paths:         usize,
    pub economics:         Option<ChannelEconomicsConfig>,
}

#[derive(Debug, Clone, Deserialize)]
struct AttributionFile {
    removal_policy: RemovalPolicy,
    #[serde(default)]
    parallel_channels: bool,
    #[serde(default = "default_edge_threshold")]
    edge_threshold: f64,
    #[serde(default = "default_top_paths")]
    top_paths: usize,
}

fn default_edge_threshold() -> f64 {
    0.01
}

fn default_top_paths() -> usize {
    10
}

// ── Channel economics ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelEconomicsConfig {
    /// Net revenue earned per conversion, in the same currency as costs.
    pub revenue_per_conversion: f64,
    /// Total spend per channel over the attribution window.
    pub channel_costs: BTreeMap<String, f64>,
    #[serde(default)]
    pub scenarios: Vec<ReallocationScenario>,
}

/// A named budget reallocation: channel → spend multiplier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReallocationScenario {
    pub name: String,
    pub multipliers: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChannelEconomicsFile {
    revenue_per_conversion: f64,
    channel_costs: BTreeMap<String, f64>,
    #[serde(default)]
    scenarios: Vec<ReallocationScenario>,
}

impl AttributionConfig {
    /// Load from `{data_dir}/attribution/attribution_config.json` and, when
    /// present, `{data_dir}/economics/channel_economics.json`.
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let path = format!("{data_dir}/attribution/attribution_config.json");
        let content = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let file: AttributionFile = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Cannot parse {path}: {e}"))?;

        let econ_path = format!("{data_dir}/economics/channel_economics.json");
        let economics = if Path::new(&econ_path).exists() {
            let econ_content = std::fs::read_to_string(&econ_path)
                .map_err(|e| anyhow::anyhow!("Cannot read {econ_path}: {e}"))?;
            let econ_file: ChannelEconomicsFile = serde_json::from_str(&econ_content)
                .map_err(|e| anyhow::anyhow!("Cannot parse {econ_path}: {e}"))?;
            Some(ChannelEconomicsConfig {
                revenue_per_conversion: econ_file.revenue_per_conversion,
                channel_costs: econ_file.channel_costs,
                scenarios: econ_file.scenarios,
            })
        } else {
            log::debug!("config: {econ_path} not found, channel economics disabled");
            None
        };

        if file.edge_threshold < 0.0 || file.edge_threshold >= 1.0 {
            anyhow::bail!("edge_threshold must be in [0, 1), got {}", file.edge_threshold);
        }

        Ok(Self {
            removal_policy: file.removal_policy,
            parallel_channels: file.parallel_channels,
            edge_threshold: file.edge_threshold,
            top_paths: file.top_paths,
            economics,
        })
    }

    /// Config with hardcoded defaults for use in unit tests.
    pub fn default_test() -> Self {
        let channel_costs: BTreeMap<String, f64> = [
            ("TV".to_string(), 1_200.0),
            ("Prog_Contextual".to_string(), 400.0),
            ("Prog_Retargeting".to_string(), 250.0),
        ]
        .into();

        let scenarios = vec![
            ReallocationScenario {
                name: "baseline".into(),
                multipliers: [
                    ("TV".to_string(), 1.0),
                    ("Prog_Contextual".to_string(), 1.0),
                    ("Prog_Retargeting".to_string(), 1.0),
                ]
                .into(),
            },
            ReallocationScenario {
                name: "shift_to_contextual".into(),
                multipliers: [
                    ("TV".to_string(), 1.0),
                    ("Prog_Contextual".to_string(), 1.5),
                    ("Prog_Retargeting".to_string(), 0.0),
                ]
                .into(),
            },
        ];

        Self {
            removal_policy: RemovalPolicy::Deletion,
            parallel_channels: false,
            edge_threshold: default_edge_threshold(),
            top_paths: default_top_paths(),
            economics: Some(ChannelEconomicsConfig {
                revenue_per_conversion: 20.0,
                channel_costs,
                scenarios,
            }),
        }
    }
}
