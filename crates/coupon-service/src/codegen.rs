//! 兑换码生成器
//!
//! 生成人类可读、不可猜测的兑换码。字母表剔除了易混淆字符
//! （0/O、1/I），采样来自密码学强度的随机源；存储层除唯一约束外
//! 不做全局查重，碰撞概率由码空间（32^8 ≈ 1.1e12）保证可忽略。

use rand::Rng;

/// 兑换码字母表：大写字母与数字，剔除 0/O/1/I
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// 兑换码长度
const CODE_LENGTH: usize = 8;

/// 兑换码生成器
#[derive(Debug, Clone, Default)]
pub struct CodeGenerator;

impl CodeGenerator {
    pub fn new() -> Self {
        Self
    }

    /// 生成一个兑换码
    ///
    /// ThreadRng 是 CSPRNG，每个符号做满熵采样。
    pub fn generate(&self) -> String {
        let mut rng = rand::rng();
        (0..CODE_LENGTH)
            .map(|_| CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())] as char)
            .collect()
    }
}

/// 归一化兑换码：去除首尾空白并转为大写
///
/// 存储侧始终保存大写码，核销入口先归一化再查询，
/// 由此实现不区分大小写的比较。
pub fn normalize_code(raw: &str) -> String {
    raw.trim().to_uppercase()
}
