//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `KOALA__*` 覆盖（双下划线表示嵌套，如 `KOALA__NOTIFY__COOLDOWN_SECS=1800`）。
//!
//! 需要经验调参的常量（情绪阈值、对账宽限期、通知冷却等）全部集中在这里。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub capability: CapabilitySection,
    #[serde(default)]
    pub companion: CompanionSection,
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub reconcile: ReconcileSection,
    #[serde(default)]
    pub notify: NotifySection,
}

/// [app] 段：应用名、监听地址（web feature 使用）
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
    /// HTTP API 监听地址，未设置时用 127.0.0.1:8080
    pub bind_addr: Option<String>,
    /// SQLite 数据库路径（async-sqlite feature 使用）
    pub db_path: Option<PathBuf>,
}

/// [capability] 段：能力调用超时与重试
#[derive(Debug, Clone, Deserialize)]
pub struct CapabilitySection {
    /// 单次能力调用的默认截止时长（秒）
    #[serde(default = "default_capability_timeout_secs")]
    pub timeout_secs: u64,
    /// 必需能力失败前的重试次数（非必需能力不重试，直接降级）
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// 能力名 -> HTTP 端点；未配置的能力用 mock 后端顶上
    #[serde(default)]
    pub endpoints: std::collections::HashMap<String, String>,
}

fn default_capability_timeout_secs() -> u64 {
    10
}

fn default_max_retries() -> u32 {
    1
}

/// [companion] 段：情绪算法常量
///
/// 数值均为经验值，按需调参。
#[derive(Debug, Clone, Deserialize)]
pub struct CompanionSection {
    /// 情绪记忆容量（FIFO 环，超出淘汰最旧）
    #[serde(default = "default_memory_capacity")]
    pub memory_capacity: usize,
    /// 信心值 EMA 窗口（最近 N 次情绪分）
    #[serde(default = "default_ema_window")]
    pub ema_window: usize,
    /// 情绪分 > excited_threshold 且成功信号足够 → Excited
    #[serde(default = "default_excited_threshold")]
    pub excited_threshold: f64,
    /// 情绪分 > proud_threshold → Proud / Happy
    #[serde(default = "default_proud_threshold")]
    pub proud_threshold: f64,
    /// 情绪分 < concerned_threshold（或挫败信号堆积）→ Concerned
    #[serde(default = "default_concerned_threshold")]
    pub concerned_threshold: f64,
    /// 情绪分 < encouraging_threshold → Encouraging
    #[serde(default = "default_encouraging_threshold")]
    pub encouraging_threshold: f64,
}

fn default_memory_capacity() -> usize {
    50
}

fn default_ema_window() -> usize {
    5
}

fn default_excited_threshold() -> f64 {
    0.8
}

fn default_proud_threshold() -> f64 {
    0.7
}

fn default_concerned_threshold() -> f64 {
    0.4
}

fn default_encouraging_threshold() -> f64 {
    0.6
}

/// [session] 段：会话生命周期窗口
#[derive(Debug, Clone, Deserialize)]
pub struct SessionSection {
    /// Paused 会话的保留窗口（秒），超时转 Abandoned
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
    /// Active 会话的不活跃阈值（秒），超时转 Abandoned
    #[serde(default = "default_inactivity_secs")]
    pub inactivity_secs: u64,
    /// 后台清扫周期（秒）
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_retention_secs() -> u64 {
    1800
}

fn default_inactivity_secs() -> u64 {
    3600
}

fn default_sweep_interval_secs() -> u64 {
    60
}

/// [reconcile] 段：离线对账宽限期
#[derive(Debug, Clone, Deserialize)]
pub struct ReconcileSection {
    /// 事件时间戳落后档案 last_applied 超过该宽限期（秒）时按 warn 记录陈旧 XP
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,
}

fn default_grace_secs() -> u64 {
    600
}

/// [notify] 段：通知冷却
#[derive(Debug, Clone, Deserialize)]
pub struct NotifySection {
    /// 同学生同类型通知的冷却窗口（秒）
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

fn default_cooldown_secs() -> u64 {
    3600
}


impl Default for CapabilitySection {
    fn default() -> Self {
        Self {
            timeout_secs: default_capability_timeout_secs(),
            max_retries: default_max_retries(),
            endpoints: std::collections::HashMap::new(),
        }
    }
}

impl Default for CompanionSection {
    fn default() -> Self {
        Self {
            memory_capacity: default_memory_capacity(),
            ema_window: default_ema_window(),
            excited_threshold: default_excited_threshold(),
            proud_threshold: default_proud_threshold(),
            concerned_threshold: default_concerned_threshold(),
            encouraging_threshold: default_encouraging_threshold(),
        }
    }
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            retention_secs: default_retention_secs(),
            inactivity_secs: default_inactivity_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl Default for ReconcileSection {
    fn default() -> Self {
        Self {
            grace_secs: default_grace_secs(),
        }
    }
}

impl Default for NotifySection {
    fn default() -> Self {
        Self {
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app: AppSection::default(),
            capability: CapabilitySection::default(),
            companion: CompanionSection::default(),
            session: SessionSection::default(),
            reconcile: ReconcileSection::default(),
            notify: NotifySection::default(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 KOALA__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 KOALA__*（双下划线表示嵌套键）
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
        config::Environment::with_prefix("KOALA")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.companion.ema_window, 5);
        assert_eq!(cfg.companion.memory_capacity, 50);
        assert!(cfg.companion.concerned_threshold < cfg.companion.encouraging_threshold);
        assert!(cfg.companion.encouraging_threshold < cfg.companion.proud_threshold);
        assert!(cfg.companion.proud_threshold < cfg.companion.excited_threshold);
        assert_eq!(cfg.reconcile.grace_secs, 600);
        assert_eq!(cfg.notify.cooldown_secs, 3600);
    }

    #[test]
    fn test_load_without_files() {
        let cfg = load_config(None).expect("env-only load should succeed");
        assert_eq!(cfg.capability.timeout_secs, 10);
    }
}
