//! 多备选漂移扩散模型（DDM）
//!
//! 每步 evidence_i += drift_i * dt + N(0, sigma * sqrt(dt))，任一备选达到阈值即选中；
//! 超时（max_time / dt 步）时取证据最多者。噪声来自调用方传入的 Rng，便于固定种子复现。

use rand::Rng;
use rand_distr::{Distribution, StandardNormal};
use serde::Serialize;

use crate::config::AddmSection;
use crate::core::CoordinationError;

#[derive(Debug, Clone, Serialize)]
pub struct DdmResult {
    pub chosen: usize,
    pub reaction_time_ms: f64,
    pub confidence: f64,
    pub timed_out: bool,
}

#[derive(Debug, Clone)]
pub struct MultiAlternativeDdm {
    pub threshold: f64,
    pub noise_sigma: f64,
    pub dt: f64,
    pub max_time: f64,
}

impl Default for MultiAlternativeDdm {
    fn default() -> Self {
        Self {
            threshold: 1.0,
            noise_sigma: 0.1,
            dt: 0.001,
            max_time: 2.0,
        }
    }
}

impl MultiAlternativeDdm {
    pub fn from_config(cfg: &AddmSection) -> Self {
        Self {
            threshold: cfg.ddm_threshold,
            noise_sigma: cfg.ddm_noise_sigma,
            dt: cfg.ddm_dt,
            max_time: cfg.ddm_max_time_secs,
        }
    }

    fn max_steps(&self) -> usize {
        (self.max_time / self.dt) as usize
    }

    pub fn simulate<R: Rng + ?Sized>(
        &self,
        drift_rates: &[f64],
        rng: &mut R,
    ) -> Result<DdmResult, CoordinationError> {
        if drift_rates.is_empty() {
            return Err(CoordinationError::Simulation(
                "at least one alternative is required".to_string(),
            ));
        }
        if self.dt <= 0.0 || self.threshold <= 0.0 {
            return Err(CoordinationError::Simulation(format!(
                "invalid DDM parameters: dt={}, threshold={}",
                self.dt, self.threshold
            )));
        }

        let n = drift_rates.len();
        let step_sigma = self.noise_sigma * self.dt.sqrt();
        let mut evidence = vec![0.0_f64; n];

        for step in 0..self.max_steps() {
            for (e, drift) in evidence.iter_mut().zip(drift_rates) {
                let z: f64 = StandardNormal.sample(rng);
                *e += drift * self.dt + step_sigma * z;
            }
            let chosen = argmax(&evidence);
            if evidence[chosen] >= self.threshold {
                let confidence = relative_confidence(&evidence, chosen).unwrap_or(0.5);
                return Ok(DdmResult {
                    chosen,
                    reaction_time_ms: step as f64 * self.dt * 1000.0,
                    confidence,
                    timed_out: false,
                });
            }
        }

        let chosen = argmax(&evidence);
        let confidence = relative_confidence(&evidence, chosen).unwrap_or(1.0 / n as f64);
        tracing::warn!(max_time = self.max_time, chosen, "DDM timed out, choosing most evidence");
        Ok(DdmResult {
            chosen,
            reaction_time_ms: self.max_time * 1000.0,
            confidence,
            timed_out: true,
        })
    }
}

/// 同值取第一个
fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, v) in values.iter().enumerate() {
        if *v > values[best] {
            best = i;
        }
    }
    best
}

/// 选中项证据 / 正证据之和，截断到 [0, 1]；和为 0 时 None
fn relative_confidence(evidence: &[f64], chosen: usize) -> Option<f64> {
    let positive: f64 = evidence.iter().map(|e| e.max(0.0)).sum();
    if positive > 0.0 {
        Some((evidence[chosen] / positive).clamp(0.0, 1.0))
    } else {
        None
    }
}
