// 该文件是 Shelfwatch （货架哨兵） 项目的一部分。
// src/stock.rs - 库存状态分级
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

use serde::Serialize;
use thiserror::Error;

pub const DEFAULT_OPTIMAL_ABOVE: usize = 10;
pub const DEFAULT_CRITICAL_AT_OR_BELOW: usize = 2;

#[derive(Error, Debug, PartialEq, Eq)]
#[error("库存阈值无效: 严重阈值 {critical_at_or_below} 必须小于充足阈值 {optimal_above}")]
pub struct ThresholdError {
  pub optimal_above: usize,
  pub critical_at_or_below: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StockStatus {
  Optimal,
  LowStock,
  Critical,
}

impl StockStatus {
  pub fn label(&self) -> &'static str {
    match self {
      StockStatus::Optimal => "OPTIMAL",
      StockStatus::LowStock => "LOW STOCK",
      StockStatus::Critical => "CRITICAL",
    }
  }

  pub fn icon(&self) -> &'static str {
    match self {
      StockStatus::Optimal => "✓",
      StockStatus::LowStock => "⚠",
      StockStatus::Critical => "✕",
    }
  }

  /// 颜色语义
  pub fn tone(&self) -> &'static str {
    match self {
      StockStatus::Optimal => "success",
      StockStatus::LowStock => "warning",
      StockStatus::Critical => "critical",
    }
  }

  pub fn color(&self) -> &'static str {
    match self {
      StockStatus::Optimal => "#1e8e3e",
      StockStatus::LowStock => "#f29900",
      StockStatus::Critical => "#d93025",
    }
  }

  pub fn message(&self) -> &'static str {
    match self {
      StockStatus::Optimal => "Stock level is healthy",
      StockStatus::LowStock => "Stock is below recommended threshold",
      StockStatus::Critical => "Stock critically low, restock immediately",
    }
  }
}

/// 按数量分级，顺序判断，先命中者为准
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockThresholds {
  optimal_above: usize,
  critical_at_or_below: usize,
}

impl Default for StockThresholds {
  fn default() -> Self {
    Self {
      optimal_above: DEFAULT_OPTIMAL_ABOVE,
      critical_at_or_below: DEFAULT_CRITICAL_AT_OR_BELOW,
    }
  }
}

impl StockThresholds {
  pub fn new(optimal_above: usize, critical_at_or_below: usize) -> Result<Self, ThresholdError> {
    if critical_at_or_below >= optimal_above {
      return Err(ThresholdError {
        optimal_above,
        critical_at_or_below,
      });
    }

    Ok(Self {
      optimal_above,
      critical_at_or_below,
    })
  }

  pub fn optimal_above(&self) -> usize {
    self.optimal_above
  }

  pub fn critical_at_or_below(&self) -> usize {
    self.critical_at_or_below
  }

  pub fn classify(&self, count: usize) -> StockStatus {
    if count > self.optimal_above {
      StockStatus::Optimal
    } else if count > self.critical_at_or_below {
      StockStatus::LowStock
    } else {
      StockStatus::Critical
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn default_boundaries() {
    let thresholds = StockThresholds::default();
    for count in 0..=2 {
      assert_eq!(thresholds.classify(count), StockStatus::Critical, "count {}", count);
    }
    for count in 3..=10 {
      assert_eq!(thresholds.classify(count), StockStatus::LowStock, "count {}", count);
    }
    assert_eq!(thresholds.classify(11), StockStatus::Optimal);
    assert_eq!(thresholds.classify(usize::MAX), StockStatus::Optimal);
  }

  #[test]
  fn custom_thresholds() {
    let thresholds = StockThresholds::new(5, 0).unwrap();
    assert_eq!(thresholds.classify(0), StockStatus::Critical);
    assert_eq!(thresholds.classify(1), StockStatus::LowStock);
    assert_eq!(thresholds.classify(5), StockStatus::LowStock);
    assert_eq!(thresholds.classify(6), StockStatus::Optimal);
  }

  #[test]
  fn rejects_inverted_thresholds() {
    assert_eq!(
      StockThresholds::new(2, 2),
      Err(ThresholdError {
        optimal_above: 2,
        critical_at_or_below: 2
      })
    );
    assert!(StockThresholds::new(1, 5).is_err());
  }

  #[test]
  fn presentation_triples() {
    assert_eq!(
      (StockStatus::Optimal.icon(), StockStatus::Optimal.tone(), StockStatus::Optimal.label()),
      ("✓", "success", "OPTIMAL")
    );
    assert_eq!(
      (StockStatus::LowStock.icon(), StockStatus::LowStock.tone(), StockStatus::LowStock.label()),
      ("⚠", "warning", "LOW STOCK")
    );
    assert_eq!(
      (StockStatus::Critical.icon(), StockStatus::Critical.tone(), StockStatus::Critical.label()),
      ("✕", "critical", "CRITICAL")
    );
    assert_eq!(
      StockStatus::LowStock.message(),
      "Stock is below recommended threshold"
    );
  }

  #[test]
  fn serializes_as_screaming_snake_case() {
    assert_eq!(
      serde_json::to_string(&StockStatus::LowStock).unwrap(),
      "\"LOW_STOCK\""
    );
  }
}
