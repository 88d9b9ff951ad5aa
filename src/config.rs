//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `ADDM__*` 覆盖（双下划线表示嵌套，如 `ADDM__DISCOVERY__MIN_QUALITY=0.7`）。

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::core::CoordinationError;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub coordination: CoordinationSection,
    #[serde(default)]
    pub discovery: DiscoverySection,
    #[serde(default)]
    pub router: RouterSection,
    #[serde(default)]
    pub registry: RegistrySection,
    #[serde(default)]
    pub addm: AddmSection,
}

/// [app] 段：应用名与日志级别
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    pub name: Option<String>,
    /// RUST_LOG 未设置时使用的默认级别
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// [llm] 段：生成后端（OpenAI 兼容端点，默认 OpenRouter）
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// 未设置时回退到环境变量 OPENROUTER_API_KEY
    pub api_key: Option<String>,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: default_base_url(),
            api_key: None,
        }
    }
}

fn default_provider() -> String {
    "openrouter".to_string()
}

fn default_model() -> String {
    "anthropic/claude-sonnet-4".to_string()
}

fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

/// [coordination] 段：信号账本与专家注册表共享的参数
#[derive(Debug, Clone, Deserialize)]
pub struct CoordinationSection {
    /// 信号计入当前任务所需的最小任务特征余弦相似度
    #[serde(default = "default_vigilance_threshold")]
    pub vigilance_threshold: f64,
    /// 信号半衰期（秒）
    #[serde(default = "default_decay_rate_secs")]
    pub decay_rate_secs: f64,
    /// 路由时考虑的专家数量上限
    #[serde(default = "default_max_specialists")]
    pub max_specialists: usize,
    /// specialization_strength 向最新领域集中度靠拢的 EMA 系数
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    /// 最终质量达到该值才计为成功
    #[serde(default = "default_success_threshold")]
    pub success_threshold: f64,
    /// 超过多少个半衰期的信号视为过期
    #[serde(default = "default_expiry_half_lives")]
    pub expiry_half_lives: f64,
}

impl Default for CoordinationSection {
    fn default() -> Self {
        Self {
            vigilance_threshold: default_vigilance_threshold(),
            decay_rate_secs: default_decay_rate_secs(),
            max_specialists: default_max_specialists(),
            learning_rate: default_learning_rate(),
            success_threshold: default_success_threshold(),
            expiry_half_lives: default_expiry_half_lives(),
        }
    }
}

fn default_vigilance_threshold() -> f64 {
    0.75
}

fn default_decay_rate_secs() -> f64 {
    1800.0
}

fn default_max_specialists() -> usize {
    10
}

fn default_learning_rate() -> f64 {
    0.3
}

fn default_success_threshold() -> f64 {
    0.5
}

fn default_expiry_half_lives() -> f64 {
    8.0
}

/// [discovery] 段：模式发现的阈值（运行期可通过 PatternDiscoveryEngine::update_settings 调整）
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct DiscoverySection {
    #[serde(default = "default_min_quality")]
    pub min_quality: f64,
    #[serde(default = "default_min_cluster_size")]
    pub min_cluster_size: usize,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    /// 执行记录少于该值时不运行发现
    #[serde(default = "default_readiness_threshold")]
    pub readiness_threshold: usize,
    /// 每累计多少条执行记录自动运行一次发现（0 表示仅手动）
    #[serde(default = "default_discovery_interval")]
    pub interval: usize,
}

impl Default for DiscoverySection {
    fn default() -> Self {
        Self {
            min_quality: default_min_quality(),
            min_cluster_size: default_min_cluster_size(),
            similarity_threshold: default_similarity_threshold(),
            readiness_threshold: default_readiness_threshold(),
            interval: default_discovery_interval(),
        }
    }
}

fn default_min_quality() -> f64 {
    0.6
}

fn default_min_cluster_size() -> usize {
    5
}

fn default_similarity_threshold() -> f64 {
    0.6
}

fn default_readiness_threshold() -> usize {
    10
}

fn default_discovery_interval() -> usize {
    10
}

/// 专家选择偏好：偏向专才 / 偏向通才 / 不偏
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RouterPolicy {
    #[default]
    Balanced,
    PreferSpecialists,
    PreferGeneralists,
}

/// [router] 段：score = w1 * 衰减信号 + w2 * 平均质量 + w3 * 使用新近度
#[derive(Debug, Clone, Deserialize)]
pub struct RouterSection {
    #[serde(default = "default_signal_weight")]
    pub signal_weight: f64,
    #[serde(default = "default_router_quality_weight")]
    pub quality_weight: f64,
    #[serde(default = "default_router_recency_weight")]
    pub recency_weight: f64,
    #[serde(default)]
    pub policy: RouterPolicy,
    /// 偏好策略下 specialization_strength 的加成系数
    #[serde(default = "default_specialist_bias")]
    pub specialist_bias: f64,
}

impl Default for RouterSection {
    fn default() -> Self {
        Self {
            signal_weight: default_signal_weight(),
            quality_weight: default_router_quality_weight(),
            recency_weight: default_router_recency_weight(),
            policy: RouterPolicy::default(),
            specialist_bias: default_specialist_bias(),
        }
    }
}

fn default_signal_weight() -> f64 {
    0.4
}

fn default_router_quality_weight() -> f64 {
    0.4
}

fn default_router_recency_weight() -> f64 {
    0.2
}

fn default_specialist_bias() -> f64 {
    0.2
}

/// [registry] 段：趋势判定与综合排名权重
#[derive(Debug, Clone, Deserialize)]
pub struct RegistrySection {
    /// 趋势比较的滑动窗口大小
    #[serde(default = "default_trend_window")]
    pub trend_window: usize,
    /// 近期均值与前期均值之差超过该带宽才判定为 improving / declining
    #[serde(default = "default_trend_band")]
    pub trend_band: f64,
    #[serde(default = "default_rank_quality_weight")]
    pub quality_weight: f64,
    #[serde(default = "default_rank_usage_weight")]
    pub usage_weight: f64,
    #[serde(default = "default_rank_recency_weight")]
    pub recency_weight: f64,
    #[serde(default = "default_recency_half_life_secs")]
    pub recency_half_life_secs: f64,
}

impl Default for RegistrySection {
    fn default() -> Self {
        Self {
            trend_window: default_trend_window(),
            trend_band: default_trend_band(),
            quality_weight: default_rank_quality_weight(),
            usage_weight: default_rank_usage_weight(),
            recency_weight: default_rank_recency_weight(),
            recency_half_life_secs: default_recency_half_life_secs(),
        }
    }
}

fn default_trend_window() -> usize {
    5
}

fn default_trend_band() -> f64 {
    0.05
}

fn default_rank_quality_weight() -> f64 {
    0.6
}

fn default_rank_usage_weight() -> f64 {
    0.25
}

fn default_rank_recency_weight() -> f64 {
    0.15
}

fn default_recency_half_life_secs() -> f64 {
    3600.0
}

/// 工作流模式：影响证据评估与研究方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowMode {
    #[default]
    ResearchAssembly,
    NewsAnalysis,
}

/// [addm] 段：决策循环上限与 DDM 参数
#[derive(Debug, Clone, Deserialize)]
pub struct AddmSection {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    /// 上下文 + 当前内容超过该字符数时建议摘要
    #[serde(default = "default_context_summarization_threshold")]
    pub context_summarization_threshold: usize,
    #[serde(default)]
    pub workflow_mode: WorkflowMode,
    #[serde(default = "default_ddm_threshold")]
    pub ddm_threshold: f64,
    #[serde(default = "default_ddm_noise_sigma")]
    pub ddm_noise_sigma: f64,
    #[serde(default = "default_ddm_dt")]
    pub ddm_dt: f64,
    #[serde(default = "default_ddm_max_time_secs")]
    pub ddm_max_time_secs: f64,
}

impl Default for AddmSection {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            confidence_threshold: default_confidence_threshold(),
            context_summarization_threshold: default_context_summarization_threshold(),
            workflow_mode: WorkflowMode::default(),
            ddm_threshold: default_ddm_threshold(),
            ddm_noise_sigma: default_ddm_noise_sigma(),
            ddm_dt: default_ddm_dt(),
            ddm_max_time_secs: default_ddm_max_time_secs(),
        }
    }
}

/// 循环上限的允许范围
pub const MAX_ITERATIONS_CEILING: usize = 20;

fn default_max_iterations() -> usize {
    5
}

fn default_confidence_threshold() -> f64 {
    0.85
}

fn default_context_summarization_threshold() -> usize {
    32_000
}

fn default_ddm_threshold() -> f64 {
    1.0
}

fn default_ddm_noise_sigma() -> f64 {
    0.1
}

fn default_ddm_dt() -> f64 {
    0.001
}

fn default_ddm_max_time_secs() -> f64 {
    2.0
}

fn check_unit(name: &str, value: f64) -> Result<(), CoordinationError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(CoordinationError::Configuration(format!(
            "{name} must be within [0, 1], got {value}"
        )));
    }
    Ok(())
}

fn check_non_negative(name: &str, value: f64) -> Result<(), CoordinationError> {
    if value < 0.0 || !value.is_finite() {
        return Err(CoordinationError::Configuration(format!(
            "{name} must be a non-negative number, got {value}"
        )));
    }
    Ok(())
}

impl AppConfig {
    /// 校验取值范围；越界返回 Configuration 错误
    pub fn validate(&self) -> Result<(), CoordinationError> {
        let c = &self.coordination;
        check_unit("coordination.vigilance_threshold", c.vigilance_threshold)?;
        check_unit("coordination.learning_rate", c.learning_rate)?;
        check_unit("coordination.success_threshold", c.success_threshold)?;
        if c.decay_rate_secs <= 0.0 || !c.decay_rate_secs.is_finite() {
            return Err(CoordinationError::Configuration(
                "coordination.decay_rate_secs must be positive".to_string(),
            ));
        }
        check_non_negative("coordination.expiry_half_lives", c.expiry_half_lives)?;

        let d = &self.discovery;
        check_unit("discovery.min_quality", d.min_quality)?;
        check_unit("discovery.similarity_threshold", d.similarity_threshold)?;
        if d.min_cluster_size == 0 {
            return Err(CoordinationError::Configuration(
                "discovery.min_cluster_size must be at least 1".to_string(),
            ));
        }

        let r = &self.router;
        check_non_negative("router.signal_weight", r.signal_weight)?;
        check_non_negative("router.quality_weight", r.quality_weight)?;
        check_non_negative("router.recency_weight", r.recency_weight)?;
        check_non_negative("router.specialist_bias", r.specialist_bias)?;

        let g = &self.registry;
        check_non_negative("registry.trend_band", g.trend_band)?;
        check_non_negative("registry.quality_weight", g.quality_weight)?;
        check_non_negative("registry.usage_weight", g.usage_weight)?;
        check_non_negative("registry.recency_weight", g.recency_weight)?;
        if g.trend_window == 0 {
            return Err(CoordinationError::Configuration(
                "registry.trend_window must be at least 1".to_string(),
            ));
        }

        let a = &self.addm;
        if a.max_iterations == 0 || a.max_iterations > MAX_ITERATIONS_CEILING {
            return Err(CoordinationError::Configuration(format!(
                "addm.max_iterations must be within 1..={MAX_ITERATIONS_CEILING}, got {}",
                a.max_iterations
            )));
        }
        check_unit("addm.confidence_threshold", a.confidence_threshold)?;
        if a.ddm_dt <= 0.0 || a.ddm_max_time_secs <= 0.0 || a.ddm_threshold <= 0.0 {
            return Err(CoordinationError::Configuration(
                "addm DDM parameters (threshold, dt, max_time) must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// 从 config 目录加载配置，环境变量 ADDM__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 ADDM__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("ADDM")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

/// 重新从磁盘与环境变量加载配置（发现阈值等可在运行期据此更新）
pub fn reload_config() -> Result<AppConfig, config::ConfigError> {
    load_config(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_documented_values() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.coordination.vigilance_threshold, 0.75);
        assert_eq!(cfg.coordination.decay_rate_secs, 1800.0);
        assert_eq!(cfg.coordination.max_specialists, 10);
        assert_eq!(cfg.coordination.learning_rate, 0.3);
        assert_eq!(cfg.discovery.min_quality, 0.6);
        assert_eq!(cfg.discovery.min_cluster_size, 5);
        assert_eq!(cfg.discovery.similarity_threshold, 0.6);
        assert_eq!(cfg.discovery.readiness_threshold, 10);
        assert_eq!(cfg.addm.workflow_mode, WorkflowMode::ResearchAssembly);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(
            f,
            "[discovery]\nmin_quality = 0.8\nmin_cluster_size = 3\n\n[addm]\nmax_iterations = 3\nworkflow_mode = \"news_analysis\"\n\n[router]\npolicy = \"prefer_specialists\""
        )
        .unwrap();

        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.discovery.min_quality, 0.8);
        assert_eq!(cfg.discovery.min_cluster_size, 3);
        assert_eq!(cfg.discovery.similarity_threshold, 0.6);
        assert_eq!(cfg.addm.max_iterations, 3);
        assert_eq!(cfg.addm.workflow_mode, WorkflowMode::NewsAnalysis);
        assert_eq!(cfg.router.policy, RouterPolicy::PreferSpecialists);
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let mut cfg = AppConfig::default();
        cfg.addm.max_iterations = 0;
        assert!(matches!(cfg.validate(), Err(CoordinationError::Configuration(_))));

        let mut cfg = AppConfig::default();
        cfg.discovery.similarity_threshold = 1.5;
        assert!(cfg.validate().is_err());

        let mut cfg = AppConfig::default();
        cfg.coordination.decay_rate_secs = 0.0;
        assert!(cfg.validate().is_err());
    }
}
