use crate::models::request::{NewRecommendationRequest, Tier};
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::path::{Path, PathBuf};
use tokio::fs;

/// 请求文件内容
///
/// ```toml
/// user_id = "user-1"
/// tier = "standard"
/// image_references = ["https://example.com/shelf.jpg"]
///
/// [[meal]]
/// title = "Carpaccio"
/// taste = "Salty"
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct RequestFile {
    pub user_id: String,
    pub tier: Tier,
    pub image_references: Vec<String>,
    /// 数组形态或以菜品 ID 为键的表
    pub meal: JsonValue,
    /// 文件路径（加载后填充）
    #[serde(skip)]
    pub file_path: Option<String>,
}

impl RequestFile {
    /// 转换为待提交的新请求，积分按档位计算
    pub fn into_new_request(self) -> NewRecommendationRequest {
        NewRecommendationRequest::new(self.user_id, self.meal, self.image_references, self.tier)
    }
}

/// 从 TOML 文件加载请求
pub async fn load_request_file(toml_file_path: &Path) -> Result<RequestFile> {
    let content = fs::read_to_string(toml_file_path)
        .await
        .with_context(|| format!("无法读取请求文件: {}", toml_file_path.display()))?;

    let mut request: RequestFile = toml::from_str(&content)
        .with_context(|| format!("无法解析请求文件: {}", toml_file_path.display()))?;

    request.file_path = Some(toml_file_path.to_string_lossy().to_string());

    Ok(request)
}

/// 加载文件夹中所有 TOML 请求文件，按文件名排序；单个文件失败只记录警告
pub async fn load_all_request_files(folder_path: &str) -> Result<Vec<RequestFile>> {
    let folder = PathBuf::from(folder_path);

    if !folder.exists() {
        anyhow::bail!("文件夹不存在: {}", folder_path);
    }

    let mut paths = Vec::new();
    let mut entries = fs::read_dir(&folder)
        .await
        .with_context(|| format!("无法读取文件夹: {}", folder_path))?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) == Some("toml") {
            paths.push(path);
        }
    }
    paths.sort();

    let mut requests = Vec::new();
    for path in paths {
        tracing::info!(
            "正在加载: {}",
            path.file_name().unwrap_or_default().to_string_lossy()
        );

        match load_request_file(&path).await {
            Ok(request) => {
                tracing::info!(
                    "成功加载请求: 档位 {}，{} 张图片",
                    request.tier,
                    request.image_references.len()
                );
                requests.push(request);
            }
            Err(e) => {
                tracing::warn!("加载文件失败 {}: {:#}", path.display(), e);
            }
        }
    }

    Ok(requests)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::normalize_courses;

    #[test]
    fn test_parse_array_meal() {
        let file: RequestFile = toml::from_str(
            r#"
            user_id = "user-1"
            tier = "detailed"
            image_references = ["https://img/a.jpg", "https://img/b.jpg"]

            [[meal]]
            title = "Scallops"
            desc = "Seared"

            [[meal]]
            title = "Duck"
            taste = "Other"
            customTaste = "Smoky"
            "#,
        )
        .unwrap();

        assert_eq!(file.tier, Tier::Detailed);
        let new = file.into_new_request();
        assert_eq!(new.credits_charged, 20);
        let courses = normalize_courses(&new.meal);
        assert_eq!(courses.len(), 2);
        assert_eq!(courses[1].taste, "Smoky");
    }

    #[test]
    fn test_parse_keyed_meal() {
        let file: RequestFile = toml::from_str(
            r#"
            user_id = "user-2"
            tier = "simple"
            image_references = ["https://img/a.jpg"]

            [meal.course1]
            title = "Tartare"

            [meal.course2]
            type = "Sweet"
            "#,
        )
        .unwrap();

        let courses = normalize_courses(&file.meal);
        let titles: Vec<_> = courses.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, vec!["Tartare", "course2"]);
    }

    #[tokio::test]
    async fn test_missing_folder() {
        let result = load_all_request_files("/no/such/folder/for/requests").await;
        assert!(result.is_err());
    }
}
