//! Privacy guard: calibrated noise for training data
//!
//! Before historical observations reach the analyzer, the guard can perturb
//! transaction amounts with Laplace noise so that no single observation can
//! be sharply inferred from the learned patterns. Budget consumption is
//! soft accounting for the posture report, not a cryptographic enforcement
//! mechanism.

use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::config::PrivacyConfig;
use crate::models::{PrivacyComplianceReport, SplitObservation};

/// Capability interface for training-data perturbation
///
/// Injected into the orchestrator; `NoopPrivacyGuard` is the default when
/// the surrounding application enforces privacy elsewhere.
pub trait PrivacyGuard: Send + Sync {
    /// Perturb numeric training inputs in place. Categories and split
    /// allocations are never touched.
    fn apply_noise(&self, batch: &mut [SplitObservation]);

    /// Current privacy/data-minimization posture.
    fn report(&self) -> PrivacyComplianceReport;
}

/// Guard that performs no perturbation and reports a fully-protected
/// posture. Use when privacy is enforced upstream of the engine.
pub struct NoopPrivacyGuard;

impl PrivacyGuard for NoopPrivacyGuard {
    fn apply_noise(&self, _batch: &mut [SplitObservation]) {}

    fn report(&self) -> PrivacyComplianceReport {
        PrivacyComplianceReport {
            score: 1.0,
            compliant: true,
            privacy_mode: true,
            differential_privacy: true,
            data_minimization: true,
            epsilon: 0.0,
            epsilon_spent: 0.0,
            noise_applications: 0,
        }
    }
}

/// Sample a Laplace-distributed value by inverse CDF
///
/// `u` must lie in [-0.5, 0.5]; the scale is sensitivity/epsilon. The
/// magnitude term is floored so endpoint draws stay finite.
fn laplace_noise(sensitivity: f64, epsilon: f64, u: f64) -> f64 {
    let scale = sensitivity / epsilon;
    let magnitude = (1.0 - 2.0 * u.abs()).max(f64::MIN_POSITIVE);
    -scale * u.signum() * magnitude.ln()
}

struct GuardState {
    rng: StdRng,
    epsilon_spent: f64,
    noise_applications: u64,
}

/// Differential-privacy guard using the Laplace mechanism on amounts
pub struct DifferentialPrivacyGuard {
    config: PrivacyConfig,
    state: Mutex<GuardState>,
}

impl DifferentialPrivacyGuard {
    pub fn new(config: PrivacyConfig) -> Self {
        Self::with_rng(config, StdRng::from_os_rng())
    }

    /// Seeded constructor for deterministic tests
    pub fn with_seed(config: PrivacyConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: PrivacyConfig, rng: StdRng) -> Self {
        Self {
            config,
            state: Mutex::new(GuardState {
                rng,
                epsilon_spent: 0.0,
                noise_applications: 0,
            }),
        }
    }

    fn noise_enabled(&self) -> bool {
        self.config.privacy_mode && self.config.differential_privacy
    }
}

impl PrivacyGuard for DifferentialPrivacyGuard {
    fn apply_noise(&self, batch: &mut [SplitObservation]) {
        if !self.noise_enabled() || batch.is_empty() {
            return;
        }

        let mut state = self.state.lock().expect("privacy guard state poisoned");
        for obs in batch.iter_mut() {
            let u: f64 = state.rng.random_range(-0.5..0.5);
            obs.transaction.amount +=
                laplace_noise(self.config.sensitivity, self.config.epsilon, u);
        }
        state.epsilon_spent += self.config.epsilon;
        state.noise_applications += 1;

        debug!(
            transactions = batch.len(),
            epsilon = self.config.epsilon,
            epsilon_spent = state.epsilon_spent,
            "Applied Laplace noise to training batch"
        );
    }

    fn report(&self) -> PrivacyComplianceReport {
        let mut score: f64 = 1.0;
        if !self.config.privacy_mode {
            score -= self.config.privacy_mode_penalty;
        }
        if !self.config.differential_privacy {
            score -= self.config.differential_privacy_penalty;
        }
        if !self.config.data_minimization {
            score -= self.config.data_minimization_penalty;
        }
        let score = score.max(0.0);

        let state = self.state.lock().expect("privacy guard state poisoned");
        PrivacyComplianceReport {
            score,
            compliant: score >= self.config.compliance_floor,
            privacy_mode: self.config.privacy_mode,
            differential_privacy: self.config.differential_privacy,
            data_minimization: self.config.data_minimization,
            epsilon: self.config.epsilon,
            epsilon_spent: state.epsilon_spent,
            noise_applications: state.noise_applications,
        }
    }
}
