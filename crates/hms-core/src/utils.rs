//! 通用工具函数

use crate::error::{HmsError, Result};
use std::path::Path;

/// 允许上传的影像文件扩展名
pub const ALLOWED_IMAGE_EXTENSIONS: [&str; 4] = [".jpg", ".jpeg", ".png", ".dcm"];

/// 影像计费任务的描述
pub const BILLING_TASK_DESCRIPTION: &str = "Pay for Image Scan Procedure";

/// 校验影像文件名，返回小写扩展名（含点号）
pub fn validate_image_extension(file_name: &str) -> Result<String> {
    let extension = Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
        .unwrap_or_default();

    if ALLOWED_IMAGE_EXTENSIONS.contains(&extension.as_str()) {
        Ok(extension)
    } else {
        Err(HmsError::Validation(format!(
            "invalid file type '{}', allowed types: {}",
            file_name,
            ALLOWED_IMAGE_EXTENSIONS.join(", ")
        )))
    }
}

/// 费用不能为负
pub fn validate_cost(cost: i64) -> Result<i64> {
    if cost < 0 {
        return Err(HmsError::Validation(format!("invalid cost value: {}", cost)));
    }
    Ok(cost)
}

/// 必填字段校验，返回去除首尾空白后的值
pub fn require_non_empty(field: &str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(HmsError::Validation(format!("{} is required", field)));
    }
    Ok(trimmed.to_string())
}

/// 费用下限为零
pub fn clamp_total(total: i64) -> i64 {
    total.max(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_image_extension() {
        assert_eq!(validate_image_extension("scan.DCM").unwrap(), ".dcm");
        assert_eq!(validate_image_extension("chest.jpeg").unwrap(), ".jpeg");
        assert!(validate_image_extension("report.pdf").is_err());
        assert!(validate_image_extension("no_extension").is_err());
    }

    #[test]
    fn test_validate_cost() {
        assert_eq!(validate_cost(0).unwrap(), 0);
        assert!(validate_cost(-1).is_err());
    }

    #[test]
    fn test_require_non_empty() {
        assert_eq!(require_non_empty("name", "  Ann ").unwrap(), "Ann");
        assert!(require_non_empty("name", "   ").is_err());
    }

    #[test]
    fn test_clamp_total() {
        assert_eq!(clamp_total(-70), 0);
        assert_eq!(clamp_total(30), 30);
    }
}
