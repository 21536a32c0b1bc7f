use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::augment::{Augmenter, OpenAiAugmenter, ServiceError};
use crate::config::{Config, DetectionConfig};
use crate::detect::aggregate::aggregate;
use crate::detect::entities::BatchIndex;
use crate::detect::reduce::reduce_with_threshold;
use crate::detect::rules::{evaluate_all, RuleTuning, CATALOG};
use crate::detect::types::{AiStatus, DetectionResult, Finding, ThreatLevel};
use crate::detect::DetectError;

/// Default bound on a single AI call.
const DEFAULT_AI_TIMEOUT: Duration = Duration::from_secs(15);

/// Detection engine. Holds only read-only configuration, so one instance is
/// shared across concurrent calls; every call builds its own batch index.
pub struct Detector {
    config: DetectionConfig,
    tuning: RuleTuning,
    call_timeout: Duration,
    augmenter: Option<Arc<dyn Augmenter>>,
    ai_timeout: Duration,
}

/// How the AI leg of one call ended.
enum AiOutcome {
    Skipped,
    Completed(Vec<Finding>),
    Failed(ServiceError),
    /// The whole-call deadline ran out before the upstream answered.
    DeadlineHit,
}

impl Detector {
    /// Rule-only engine.
    pub fn new(config: DetectionConfig) -> Self {
        let tuning = RuleTuning::from(&config);
        let call_timeout = Duration::from_secs(config.call_timeout_secs.max(1));
        Self {
            config,
            tuning,
            call_timeout,
            augmenter: None,
            ai_timeout: DEFAULT_AI_TIMEOUT,
        }
    }

    /// Engine from the full config. The OpenAI backend is attached when a key
    /// is available; otherwise AI requests fail with a configuration error.
    pub fn from_config(cfg: &Config) -> Self {
        let detector = Self::new(cfg.detection.clone());
        match OpenAiAugmenter::from_config(&cfg.ai) {
            Ok(backend) => {
                info!(model = %cfg.ai.model, "AI augmentation available");
                detector.with_augmenter(
                    Arc::new(backend),
                    Duration::from_secs(cfg.ai.timeout_secs.max(1)),
                )
            }
            Err(ServiceError::Unconfigured(reason)) => {
                info!(%reason, "AI augmentation disabled");
                detector
            }
            Err(e) => {
                warn!(error = %e, "AI backend could not be initialised, running rule-only");
                detector
            }
        }
    }

    pub fn with_augmenter(mut self, augmenter: Arc<dyn Augmenter>, timeout: Duration) -> Self {
        self.augmenter = Some(augmenter);
        self.ai_timeout = timeout;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    pub fn ai_available(&self) -> bool {
        self.augmenter.is_some()
    }

    /// Recompute the overall verdict of `findings` with this engine's
    /// acceptance threshold.
    pub fn reduce_threat_level(&self, findings: &[Finding]) -> ThreatLevel {
        reduce_with_threshold(findings, self.config.acceptance_threshold)
    }

    /// Number of rules in the catalog.
    pub fn patterns_loaded(&self) -> usize {
        CATALOG.len()
    }

    /// Synchronous rule-only pass, no AI and no deadline.
    pub fn detect_rules_only(&self, logs: &str) -> DetectionResult {
        let rule_findings = run_rules(logs, &self.tuning);
        self.finish(rule_findings, Vec::new(), AiStatus::NotRequested)
    }

    /// Run one detection pass.
    ///
    /// Rules run on the blocking pool while the AI call (if requested) is in
    /// flight. An AI failure never fails the call: the result carries
    /// [`AiStatus::Failed`] and rule-only findings. When the call deadline
    /// passes during the AI call, rule-only findings are returned if
    /// `partial_results` is set, otherwise the call fails.
    pub async fn detect(
        &self,
        logs: &str,
        compressed_context: Option<&str>,
        ai_enabled: bool,
    ) -> Result<DetectionResult, DetectError> {
        self.config
            .validate()
            .map_err(|e| DetectError::Configuration(e.to_string()))?;
        let augmenter = match (ai_enabled, &self.augmenter) {
            (false, _) => None,
            (true, Some(a)) => Some(Arc::clone(a)),
            (true, None) => {
                return Err(DetectError::Configuration(
                    "AI augmentation requested but no AI backend is configured \
                     (set ai.api_key or OPENAI_API_KEY)"
                        .into(),
                ))
            }
        };

        if logs.trim().is_empty() {
            debug!("empty log batch, nothing to evaluate");
            return Ok(DetectionResult::empty(AiStatus::NotRequested));
        }

        let deadline = Instant::now() + self.call_timeout;
        debug!(
            lines = logs.lines().count(),
            ai = augmenter.is_some(),
            compressed = compressed_context.is_some(),
            "detection started"
        );

        let rules_task = {
            let text = logs.to_owned();
            let tuning = self.tuning.clone();
            tokio::task::spawn_blocking(move || run_rules(&text, &tuning))
        };

        let ai_text = compressed_context
            .filter(|c| !c.trim().is_empty())
            .unwrap_or(logs);

        let (rules, ai) = futures::future::join(
            tokio::time::timeout_at(deadline, rules_task),
            self.run_augmenter(augmenter, ai_text, deadline),
        )
        .await;

        let rule_findings = match rules {
            Ok(Ok(findings)) => findings,
            Ok(Err(join_err)) => {
                return Err(DetectError::Internal(format!("rule evaluation failed: {join_err}")))
            }
            Err(_) => return Err(DetectError::DeadlineExceeded(self.call_timeout)),
        };

        let (ai_findings, status) = match ai {
            AiOutcome::Skipped => (Vec::new(), AiStatus::NotRequested),
            AiOutcome::Completed(findings) => {
                let accepted = findings.len();
                (findings, AiStatus::Completed { accepted })
            }
            AiOutcome::Failed(e) => {
                warn!(error = %e, "AI augmentation failed, using rule-only findings");
                (Vec::new(), AiStatus::Failed { reason: e.to_string() })
            }
            AiOutcome::DeadlineHit if self.config.partial_results => {
                warn!(
                    timeout = ?self.call_timeout,
                    "call deadline reached during AI augmentation, returning rule-only findings"
                );
                let reason = format!("call deadline of {:?} exceeded", self.call_timeout);
                (Vec::new(), AiStatus::Failed { reason })
            }
            AiOutcome::DeadlineHit => {
                return Err(DetectError::DeadlineExceeded(self.call_timeout));
            }
        };

        Ok(self.finish(rule_findings, ai_findings, status))
    }

    async fn run_augmenter(
        &self,
        augmenter: Option<Arc<dyn Augmenter>>,
        text: &str,
        deadline: Instant,
    ) -> AiOutcome {
        let Some(augmenter) = augmenter else {
            return AiOutcome::Skipped;
        };

        let own_deadline = Instant::now() + self.ai_timeout;
        let bounded_by_call = deadline <= own_deadline;
        let stop_at = if bounded_by_call { deadline } else { own_deadline };

        // Dropping the future on timeout abandons the in-flight request.
        match tokio::time::timeout_at(stop_at, augmenter.augment(text)).await {
            Ok(Ok(findings)) => AiOutcome::Completed(findings),
            Ok(Err(e)) => AiOutcome::Failed(e),
            Err(_) if bounded_by_call => AiOutcome::DeadlineHit,
            Err(_) => {
                debug!(backend = augmenter.name(), timeout = ?self.ai_timeout, "AI call timed out");
                AiOutcome::Failed(ServiceError::Timeout)
            }
        }
    }

    fn finish(&self, rules: Vec<Finding>, ai: Vec<Finding>, status: AiStatus) -> DetectionResult {
        let findings = aggregate(rules, ai, self.config.max_affected_resources);
        let overall = self.reduce_threat_level(&findings);
        info!(
            findings = findings.len(),
            overall = %overall,
            degraded = status.is_degraded(),
            "detection complete"
        );
        DetectionResult {
            findings,
            overall_threat_level: overall,
            ai_augmentation: status,
        }
    }
}

fn run_rules(text: &str, tuning: &RuleTuning) -> Vec<Finding> {
    let index = BatchIndex::build(text);
    evaluate_all(&index, tuning)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::types::{AnomalyType, Provenance, ThreatLevel};

    const BRUTE: &str = "10:24:12 WARN Failed login root from 203.0.113.45\n\
                         10:24:15 WARN Failed login root from 203.0.113.45\n\
                         10:24:18 WARN Failed login root from 203.0.113.45\n\
                         10:24:22 ERROR Failed login root from 203.0.113.45 - Account locked";

    struct Fixed(Vec<Finding>);

    #[async_trait::async_trait]
    impl Augmenter for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }
        async fn augment(&self, _text: &str) -> Result<Vec<Finding>, ServiceError> {
            Ok(self.0.clone())
        }
    }

    struct Hangs;

    #[async_trait::async_trait]
    impl Augmenter for Hangs {
        fn name(&self) -> &str {
            "hangs"
        }
        async fn augment(&self, _text: &str) -> Result<Vec<Finding>, ServiceError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Vec::new())
        }
    }

    fn detector() -> Detector {
        Detector::new(DetectionConfig::default())
    }

    #[tokio::test]
    async fn test_brute_force_example() {
        let result = detector().detect(BRUTE, None, false).await.unwrap();
        assert_eq!(result.findings.len(), 1);
        assert_eq!(result.findings[0].kind, AnomalyType::BruteForce);
        assert_eq!(result.findings[0].affected_resources, vec!["203.0.113.45"]);
        assert!(result.overall_threat_level >= ThreatLevel::High);
        assert_eq!(result.ai_augmentation, AiStatus::NotRequested);
    }

    #[tokio::test]
    async fn test_invalid_threshold_is_a_configuration_error() {
        let cfg = DetectionConfig {
            acceptance_threshold: f64::NAN,
            ..DetectionConfig::default()
        };
        let err = Detector::new(cfg).detect(BRUTE, None, false).await.unwrap_err();
        assert!(matches!(err, DetectError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_empty_input_yields_empty_result() {
        let result = detector().detect("", None, false).await.unwrap();
        assert!(result.findings.is_empty());
        assert_eq!(result.overall_threat_level, ThreatLevel::Info);

        let result = detector().detect("  \n\t ", None, false).await.unwrap();
        assert!(result.findings.is_empty());
    }

    #[tokio::test]
    async fn test_ai_without_backend_is_configuration_error() {
        let err = detector().detect(BRUTE, None, true).await.unwrap_err();
        assert!(matches!(err, DetectError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_ai_findings_merged() {
        let ai = Finding::new(
            AnomalyType::BruteForce,
            ThreatLevel::Critical,
            "Credential stuffing against root",
            "Disable root SSH login",
            0.9,
            vec!["203.0.113.45".into(), "root".into()],
            Provenance::Ai,
        );
        let det = detector().with_augmenter(Arc::new(Fixed(vec![ai])), Duration::from_secs(1));
        let result = det.detect(BRUTE, Some("compressed"), true).await.unwrap();

        assert_eq!(result.findings.len(), 1);
        let f = &result.findings[0];
        assert_eq!(f.severity, ThreatLevel::Critical);
        assert_eq!(f.source, Provenance::Rule);
        assert!(f.corroborated);
        assert_eq!(result.ai_augmentation, AiStatus::Completed { accepted: 1 });
        assert_eq!(result.overall_threat_level, ThreatLevel::Critical);
    }

    #[tokio::test]
    async fn test_ai_timeout_degrades_to_rules() {
        let det = detector().with_augmenter(Arc::new(Hangs), Duration::from_millis(50));
        let result = det.detect(BRUTE, None, true).await.unwrap();
        assert_eq!(result.findings.len(), 1);
        assert!(result.ai_augmentation.is_degraded());
    }

    #[tokio::test]
    async fn test_call_deadline_with_partial_results() {
        let det = detector()
            .with_augmenter(Arc::new(Hangs), Duration::from_secs(60))
            .with_call_timeout(Duration::from_millis(100));
        let result = det.detect(BRUTE, None, true).await.unwrap();
        assert_eq!(result.findings.len(), 1);
        match result.ai_augmentation {
            AiStatus::Failed { reason } => assert!(reason.contains("deadline")),
            other => panic!("unexpected status {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_call_deadline_without_partial_results() {
        let cfg = DetectionConfig {
            partial_results: false,
            ..DetectionConfig::default()
        };
        let det = Detector::new(cfg)
            .with_augmenter(Arc::new(Hangs), Duration::from_secs(60))
            .with_call_timeout(Duration::from_millis(100));
        let err = det.detect(BRUTE, None, true).await.unwrap_err();
        assert!(matches!(err, DetectError::DeadlineExceeded(_)));
    }

    #[test]
    fn test_rules_only_matches_async_path() {
        let det = detector();
        let sync = det.detect_rules_only(BRUTE);
        let async_result = tokio_test::block_on(det.detect(BRUTE, None, false)).unwrap();
        assert_eq!(sync, async_result);
        assert_eq!(det.patterns_loaded(), 8);
    }
}
