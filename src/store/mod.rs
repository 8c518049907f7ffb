//! 学生状态层
//!
//! 两类可变共享状态：学伴状态（CompanionState）与自适应档案（AdaptiveProfile）。
//! 二者都要求按学生（而非全局）互斥——逐键加锁由 keyed 模块提供，
//! 不相关学生的回合永不互相争锁。持久化引擎是外部协作者的选择，
//! 默认内存实现，可选 SQLite 持久化（async-sqlite feature）。

mod companion;
mod keyed;
mod profile;

#[cfg(feature = "async-sqlite")]
mod persistent;

pub use companion::{CompanionState, CompanionStore, InteractionSummary, MemoryEntry, Mood, PersonalityTrait};
pub use keyed::KeyedState;
pub use profile::{
    AdaptiveProfile, ApplyOutcome, Difficulty, LearningPace, ProfileStore, ProfileUpdate,
    MASTERY_THRESHOLD,
};

#[cfg(feature = "async-sqlite")]
pub use persistent::StateDb;

/// 学生 ID（注册时产生，协调器只引用从不修改）
pub type StudentId = String;
