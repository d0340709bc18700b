//! 目标尺寸解析
//!
//! 根据原图宽高和预设名计算放大后的目标尺寸，纯函数、无状态。

use serde::{Deserialize, Serialize};

/// 图片尺寸
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// 尺寸预设
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String")]
pub enum Preset {
    /// 宽高各放大 2 倍
    #[serde(rename = "2x")]
    Double,
    /// 宽高各放大 4 倍
    #[serde(rename = "4x")]
    Quadruple,
    /// 1920x1080
    #[serde(rename = "HD")]
    Hd,
    /// 3840x2160
    #[serde(rename = "4K")]
    Uhd4k,
    /// 显式指定宽高
    #[serde(rename = "custom")]
    Custom,
}

impl Default for Preset {
    fn default() -> Self {
        Preset::Double
    }
}

impl From<String> for Preset {
    fn from(name: String) -> Self {
        Preset::from_name(&name)
    }
}

impl Preset {
    /// 从预设名解析，未知预设按 2x 处理（不报错）
    pub fn from_name(name: &str) -> Self {
        match name {
            "2x" => Preset::Double,
            "4x" => Preset::Quadruple,
            "HD" => Preset::Hd,
            "4K" => Preset::Uhd4k,
            "custom" => Preset::Custom,
            _ => Preset::Double,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Preset::Double => "2x",
            Preset::Quadruple => "4x",
            Preset::Hd => "HD",
            Preset::Uhd4k => "4K",
            Preset::Custom => "custom",
        }
    }

    /// 计算目标尺寸
    ///
    /// `custom` 缺少显式宽高时退回 2x，调用方应在批次启动前校验自定义尺寸。
    pub fn resolve(&self, original: Dimensions, custom: Option<Dimensions>) -> Dimensions {
        let doubled = Dimensions::new(
            original.width.saturating_mul(2),
            original.height.saturating_mul(2),
        );

        match self {
            Preset::Double => doubled,
            Preset::Quadruple => Dimensions::new(
                original.width.saturating_mul(4),
                original.height.saturating_mul(4),
            ),
            Preset::Hd => Dimensions::new(1920, 1080),
            Preset::Uhd4k => Dimensions::new(3840, 2160),
            Preset::Custom => custom.unwrap_or(doubled),
        }
    }
}

/// 按预设名解析目标尺寸
pub fn resolve(width: u32, height: u32, preset: &str, custom: Option<(u32, u32)>) -> (u32, u32) {
    let target = Preset::from_name(preset).resolve(
        Dimensions::new(width, height),
        custom.map(|(w, h)| Dimensions::new(w, h)),
    );
    (target.width, target.height)
}
