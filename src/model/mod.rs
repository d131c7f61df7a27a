//! 库内通用的数据模型。

pub mod candidate;
pub mod download;
pub mod track;
