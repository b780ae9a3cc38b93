//! 统一错误类型定义.
//!
//! 所有 musique crate 共用的错误类型, 支持跨模块传播.
//! 码流层面的错误 (截断, 码本非法, 查表失败) 对当前帧是致命的,
//! 由帧循环决定跳帧或重新同步.

use thiserror::Error;

/// musique 统一错误类型
#[derive(Debug, Error)]
pub enum MusiqueError {
    /// 无效参数
    #[error("无效参数: {0}")]
    InvalidArgument(String),

    /// 不支持的操作或语法元素
    #[error("不支持的操作: {0}")]
    Unsupported(String),

    /// 无效数据 (损坏的码流等)
    #[error("无效数据: {0}")]
    InvalidData(String),

    /// I/O 错误
    #[error("I/O 错误: {0}")]
    Io(#[from] std::io::Error),

    /// 比特流读取越过缓冲区末尾
    ///
    /// `position` 为失败读取开始时的位偏移, 读取失败时游标不移动.
    #[error("码流截断: 位置 {position} 处请求 {requested} 位, 仅剩 {available} 位")]
    TruncatedStream {
        position: usize,
        requested: u32,
        available: usize,
    },

    /// 码本索引不在可解码范围内
    #[error("不支持的码本: {0}")]
    UnsupportedCodebook(u8),

    /// 前缀码查表在位数预算内没有匹配的行
    #[error("码表 {table} 查找失败: 已读取 {bits} 位仍未匹配")]
    MalformedTableWalk { table: &'static str, bits: u32 },
}

impl MusiqueError {
    /// 是否为码流截断
    pub fn is_truncated(&self) -> bool {
        matches!(self, Self::TruncatedStream { .. })
    }
}

/// musique 统一 Result 类型
pub type MusiqueResult<T> = Result<T, MusiqueError>;
