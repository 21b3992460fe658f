// 该文件是 Shelfwatch （货架哨兵） 项目的一部分。
// src/model/labels.rs - 类别标签
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::{collections::HashSet, fmt, path::Path, sync::Arc};

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use super::WithLabel;

#[derive(Error, Debug)]
pub enum LabelError {
  #[error("无法读取标签文件 {0}: {1}")]
  Io(String, std::io::Error),
  #[error("标签文件格式错误: {0}")]
  Parse(#[from] toml::de::Error),
  #[error("标签集合为空")]
  Empty,
  #[error("标签重复: {0}")]
  Duplicate(String),
}

/// 类别标签，类别编号与名称在模型构造时一次性解析
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClassLabel {
  id: u32,
  name: Arc<str>,
}

impl ClassLabel {
  pub fn id(&self) -> u32 {
    self.id
  }

  pub fn name(&self) -> &str {
    &self.name
  }
}

impl fmt::Display for ClassLabel {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.name)
  }
}

impl WithLabel for ClassLabel {
  fn to_label_str(&self) -> String {
    self.name.to_string()
  }

  fn to_label_id(&self) -> u32 {
    self.id
  }

  fn is_label(&self, name: &str) -> bool {
    &*self.name == name
  }
}

#[derive(Deserialize)]
struct LabelFile {
  names: Vec<String>,
}

/// 模型的类别表，下标即类别编号
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSet {
  labels: Box<[ClassLabel]>,
}

impl LabelSet {
  pub fn from_names<I, S>(names: I) -> Result<Self, LabelError>
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    let mut seen = HashSet::new();
    let mut labels = Vec::new();
    for (id, name) in names.into_iter().enumerate() {
      let name = name.as_ref().trim();
      if !seen.insert(name.to_string()) {
        return Err(LabelError::Duplicate(name.to_string()));
      }
      labels.push(ClassLabel {
        id: id as u32,
        name: Arc::from(name),
      });
    }

    if labels.is_empty() {
      return Err(LabelError::Empty);
    }

    Ok(Self {
      labels: labels.into_boxed_slice(),
    })
  }

  /// 读取形如 `names = ["sprite", "coke"]` 的 TOML 标签文件
  pub fn from_toml_file(path: &Path) -> Result<Self, LabelError> {
    let text = std::fs::read_to_string(path)
      .map_err(|e| LabelError::Io(path.display().to_string(), e))?;
    let file: LabelFile = toml::from_str(&text)?;
    let labels = Self::from_names(file.names)?;
    debug!("从 {} 读取 {} 个类别标签", path.display(), labels.len());
    Ok(labels)
  }

  pub fn len(&self) -> usize {
    self.labels.len()
  }

  pub fn is_empty(&self) -> bool {
    self.labels.is_empty()
  }

  pub fn get(&self, id: u32) -> Option<&ClassLabel> {
    self.labels.get(id as usize)
  }

  pub fn find(&self, name: &str) -> Option<ClassLabel> {
    self.labels.iter().find(|label| label.is_label(name)).cloned()
  }

  pub fn contains(&self, name: &str) -> bool {
    self.labels.iter().any(|label| label.is_label(name))
  }

  pub fn iter(&self) -> std::slice::Iter<'_, ClassLabel> {
    self.labels.iter()
  }
}

/// `sprite` → `Sprite`，`diet_coke` → `Diet Coke`
pub fn title_case(label: &str) -> String {
  label
    .split(|c: char| c.is_whitespace() || c == '_')
    .filter(|word| !word.is_empty())
    .map(|word| {
      let mut chars = word.chars();
      match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
      }
    })
    .collect::<Vec<String>>()
    .join(" ")
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  #[test]
  fn ids_follow_declaration_order() {
    let labels = LabelSet::from_names(["sprite", "coke"]).unwrap();
    assert_eq!(labels.get(0).map(ClassLabel::name), Some("sprite"));
    assert_eq!(labels.get(1).map(ClassLabel::id), Some(1));
    assert!(labels.get(2).is_none());
    assert!(labels.contains("coke"));
  }

  #[test]
  fn title_cases_labels() {
    assert_eq!(title_case("sprite"), "Sprite");
    assert_eq!(title_case("diet_coke"), "Diet Coke");
    assert_eq!(title_case("FANTA orange"), "Fanta Orange");
  }

  #[test]
  fn rejects_duplicates_and_empty_sets() {
    assert!(matches!(
      LabelSet::from_names(["sprite", "sprite"]),
      Err(LabelError::Duplicate(name)) if name == "sprite"
    ));
    assert!(matches!(
      LabelSet::from_names(Vec::<String>::new()),
      Err(LabelError::Empty)
    ));
  }

  #[test]
  fn reads_toml_label_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "names = [\"sprite\", \"coke\", \"fanta\"]").unwrap();

    let labels = LabelSet::from_toml_file(file.path()).unwrap();
    assert_eq!(labels.len(), 3);
    assert_eq!(labels.find("fanta").map(|l| l.id()), Some(2));
  }

  #[test]
  fn missing_label_file_is_io_error() {
    let err = LabelSet::from_toml_file(Path::new("/nonexistent/labels.toml")).unwrap_err();
    assert!(matches!(err, LabelError::Io(..)));
  }
}
