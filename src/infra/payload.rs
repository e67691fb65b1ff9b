//! 载荷协作者接口
//!
//! 二维码渲染和 UPI ID 加密由应用提供；这里只约定接口，
//! 通过 `PaymentGate` 保证调用前已完成准入。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// 二维码配色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorScheme {
    #[default]
    Classic,
    Dark,
    Brand,
}

/// 收款二维码渲染
#[async_trait]
pub trait QrRenderer: Send + Sync {
    /// 渲染载荷，返回图片字节
    async fn render_qr(&self, payload: &str, color_scheme: ColorScheme) -> Result<Vec<u8>>;
}

/// 载荷加密（静态存储前）
#[async_trait]
pub trait PayloadCipher: Send + Sync {
    async fn encrypt(&self, payload: &str) -> Result<Vec<u8>>;

    async fn decrypt(&self, ciphertext: &[u8]) -> Result<String>;
}
