//! Channel economics on top of an attribution table.
//!
//! Revenue is attributed conversions × revenue per conversion. Spend comes
//! from config. Scenarios scale a channel's spend and, linearly, its
//! attributed conversions.

use crate::{
    config::{ChannelEconomicsConfig, ReallocationScenario},
    removal::AttributionTable,
    types::StateLabel,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelEconomics {
    pub channel:                StateLabel,
    pub cost:                   f64,
    pub conversions_attributed: f64,
    pub revenue:                f64,
    /// cost / |conversions|; None when nothing was attributed.
    pub cost_per_conversion:    Option<f64>,
    /// (revenue − cost) / cost; None for a free channel.
    pub roi:                    Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioOutcome {
    pub name:              String,
    pub total_cost:        f64,
    pub total_conversions: f64,
    pub total_revenue:     f64,
    /// total_revenue − total_cost
    pub net_return:        f64,
}

/// One row per channel that has both a defined attribution and a known cost.
pub fn channel_economics(
    table: &AttributionTable,
    config: &ChannelEconomicsConfig,
) -> Vec<ChannelEconomics> {
    let mut rows = Vec::new();
    for record in &table.records {
        let Some(conversions) = record.conversions_attributed else {
            continue;
        };
        let Some(&cost) = config.channel_costs.get(&record.channel) else {
            log::debug!("economics: no cost configured for channel={}", record.channel);
            continue;
        };

        let revenue = conversions * config.revenue_per_conversion;
        rows.push(ChannelEconomics {
            channel: record.channel.clone(),
            cost,
            conversions_attributed: conversions,
            revenue,
            cost_per_conversion: (conversions != 0.0).then(|| cost / conversions.abs()),
            roi: (cost != 0.0).then(|| (revenue - cost) / cost),
        });
    }
    rows
}

/// Apply each scenario's spend multipliers. Channels a scenario does not
/// mention are left out of its totals.
pub fn evaluate_scenarios(
    rows: &[ChannelEconomics],
    scenarios: &[ReallocationScenario],
    revenue_per_conversion: f64,
) -> Vec<ScenarioOutcome> {
    scenarios
        .iter()
        .map(|scenario| {
            let mut total_cost = 0.0;
            let mut total_conversions = 0.0;
            for row in rows {
                let Some(&factor) = scenario.multipliers.get(&row.channel) else {
                    continue;
                };
                total_cost += row.cost * factor;
                total_conversions += row.conversions_attributed * factor;
            }
            let total_revenue = total_conversions * revenue_per_conversion;
            ScenarioOutcome {
                name: scenario.name.clone(),
                total_cost,
                total_conversions,
                total_revenue,
                net_return: total_revenue - total_cost,
            }
        })
        .collect()
}
