//! 模块版本比较
//!
//! 依赖满足判断与升级安全判断共用同一个比较器 [`ModuleVersion`]，
//! 两处的平局规则必须完全一致。
//!
//! 比较规则：
//! - 版本号按 `.` 切分为若干段，从左到右依次比较
//! - 每段由数字前缀和可选的非数字后缀组成（如 `0-beta` = `0` + `beta`）
//! - 数字前缀按数值比较
//! - 数字前缀相同时，没有后缀的段大于有后缀的段（预发布标记更低）
//! - 两段都有后缀时按字典序比较后缀
//! - 缺失的段视为 `0`，因此 `1.0 == 1.0.0`
//!
//! ```rust
//! use chips_modules::module::version::ModuleVersion;
//!
//! assert!(ModuleVersion::parse("1.2.0") > ModuleVersion::parse("1.1.9"));
//! assert!(ModuleVersion::parse("2.0.0-beta") < ModuleVersion::parse("2.0.0"));
//! assert_eq!(ModuleVersion::parse("1.0"), ModuleVersion::parse("1.0.0"));
//! ```

use std::cmp::Ordering;
use std::fmt;

/// 版本号中的一段
#[derive(Debug, Clone)]
struct Segment {
    /// 去掉前导零的数字前缀（空串表示 0）
    number: String,
    /// 非数字后缀（去掉前导分隔符）
    suffix: Option<String>,
}

impl Segment {
    fn zero() -> Self {
        Self {
            number: String::new(),
            suffix: None,
        }
    }

    fn parse(raw: &str) -> Self {
        let split_at = raw
            .char_indices()
            .find(|(_, c)| !c.is_ascii_digit())
            .map(|(i, _)| i)
            .unwrap_or(raw.len());
        let (digits, rest) = raw.split_at(split_at);

        let number = digits.trim_start_matches('0').to_string();
        let suffix = rest.trim_start_matches(|c: char| c == '-' || c == '_' || c == '+');
        let suffix = if suffix.is_empty() {
            None
        } else {
            Some(suffix.to_string())
        };

        Self { number, suffix }
    }

    fn cmp_number(&self, other: &Self) -> Ordering {
        // 先比位数再比字典序，避免大数溢出
        self.number
            .len()
            .cmp(&other.number.len())
            .then_with(|| self.number.cmp(&other.number))
    }
}

impl PartialEq for Segment {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Segment {}

impl PartialOrd for Segment {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Segment {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cmp_number(other).then_with(|| match (&self.suffix, &other.suffix) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(a), Some(b)) => a.cmp(b),
        })
    }
}

/// 可比较的模块版本号
///
/// 保留原始字符串用于展示；相等性与排序只由解析后的段决定，
/// 因此 `"1.0"` 与 `"1.0.0"` 相等但展示不同。
#[derive(Debug, Clone)]
pub struct ModuleVersion {
    raw: String,
    segments: Vec<Segment>,
}

impl ModuleVersion {
    /// 解析版本字符串，任何输入都能得到一个版本（无法识别的部分按后缀处理）
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        let body = match trimmed.strip_prefix(['v', 'V']) {
            Some(rest) if rest.starts_with(|c: char| c.is_ascii_digit()) => rest,
            _ => trimmed,
        };

        let segments = if body.is_empty() {
            Vec::new()
        } else {
            body.split('.').map(Segment::parse).collect()
        };

        Self {
            raw: trimmed.to_string(),
            segments,
        }
    }

    /// 原始版本字符串
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// 是否为空版本（原始字符串只有空白）
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// 是否满足最低版本要求（`self >= minimum`）
    pub fn satisfies(&self, minimum: &ModuleVersion) -> bool {
        self >= minimum
    }
}

/// 比较两个版本字符串
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    ModuleVersion::parse(a).cmp(&ModuleVersion::parse(b))
}

impl PartialEq for ModuleVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ModuleVersion {}

impl PartialOrd for ModuleVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ModuleVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.segments.len().max(other.segments.len());
        let zero = Segment::zero();
        for i in 0..len {
            let a = self.segments.get(i).unwrap_or(&zero);
            let b = other.segments.get(i).unwrap_or(&zero);
            match a.cmp(b) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        Ordering::Equal
    }
}

impl fmt::Display for ModuleVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl From<&str> for ModuleVersion {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}
