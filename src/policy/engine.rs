//! Compliance engine
//!
//! Each rule looks at one limit of the policy and yields at most one violation
//! message. All rules run on every check so the caller can show the user everything
//! that has to change, in a stable order.

use super::types::{PolicyVerdict, TradeIntent, UserPolicy};

type Rule = fn(&UserPolicy, &TradeIntent, i64) -> Option<String>;

fn trade_size(policy: &UserPolicy, intent: &TradeIntent, _now: i64) -> Option<String> {
    (intent.amount_in > policy.max_trade_size).then(|| {
        format!(
            "Trade size {} exceeds maximum of {}",
            intent.amount_in, policy.max_trade_size
        )
    })
}

fn cooldown(policy: &UserPolicy, _intent: &TradeIntent, now: i64) -> Option<String> {
    // a clock behind the last trade counts as zero elapsed
    let elapsed = now.saturating_sub(policy.last_trade_timestamp).max(0) as u64;
    (elapsed < policy.cooldown_seconds).then(|| {
        format!(
            "Trading cooldown active. Please wait {} more seconds.",
            policy.cooldown_seconds - elapsed
        )
    })
}

fn allowlist(policy: &UserPolicy, intent: &TradeIntent, _now: i64) -> Option<String> {
    (!policy.allows_token(&intent.token_out))
        .then(|| format!("Token {} is not in the allowlist", intent.token_out))
}

fn slippage(policy: &UserPolicy, intent: &TradeIntent, _now: i64) -> Option<String> {
    let requested = intent.max_slippage_bps?;
    (requested > policy.max_slippage_bps).then(|| {
        format!(
            "Requested slippage {} bps exceeds maximum of {} bps",
            requested, policy.max_slippage_bps
        )
    })
}

const RULES: &[(&str, Rule)] = &[
    ("trade_size", trade_size),
    ("cooldown", cooldown),
    ("allowlist", allowlist),
    ("slippage", slippage),
];

/// Stateless policy evaluator
#[derive(Debug, Clone, Copy, Default)]
pub struct ComplianceEngine;

impl ComplianceEngine {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate `intent` against `policy` at unix time `now`
    pub fn check(&self, policy: &UserPolicy, intent: &TradeIntent, now: i64) -> PolicyVerdict {
        let violations: Vec<String> = RULES
            .iter()
            .filter_map(|(name, rule)| {
                let violation = rule(policy, intent, now);
                if let Some(message) = &violation {
                    tracing::debug!(rule = name, %message, "Policy rule violated");
                }
                violation
            })
            .collect();

        let verdict = PolicyVerdict::from_violations(violations);
        tracing::info!(
            token_in = %intent.token_in,
            token_out = %intent.token_out,
            amount_in = %intent.amount_in,
            compliant = verdict.compliant,
            violations = verdict.violations.len(),
            "Policy check complete"
        );
        verdict
    }
}
