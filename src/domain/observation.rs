use super::types::Symbol;
use crate::error::EnvError;
use serde::{Deserialize, Serialize};

/// Per-asset column of an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Field {
    Open,
    High,
    Low,
    Close,
    Volume,
    /// Portfolio weight held in the asset at each row, written by the environment.
    Position,
}

/// Windowed market data for a single asset (oldest row first).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetFrame {
    pub symbol: Symbol,
    pub open: Vec<f64>,
    pub high: Vec<f64>,
    pub low: Vec<f64>,
    pub close: Vec<f64>,
    pub volume: Vec<f64>,
    pub position: Vec<f64>,
}

impl AssetFrame {
    /// Cash frame: price pinned at 1.0, no volume.
    pub fn cash(position: Vec<f64>) -> Self {
        let rows = position.len();
        Self {
            symbol: Symbol::fiat(),
            open: vec![1.0; rows],
            high: vec![1.0; rows],
            low: vec![1.0; rows],
            close: vec![1.0; rows],
            volume: vec![0.0; rows],
            position,
        }
    }

    pub fn field(&self, field: Field) -> &[f64] {
        match field {
            Field::Open => &self.open,
            Field::High => &self.high,
            Field::Low => &self.low,
            Field::Close => &self.close,
            Field::Volume => &self.volume,
            Field::Position => &self.position,
        }
    }

    /// Most recent value of a column.
    pub fn last(&self, field: Field) -> Option<f64> {
        self.field(field).last().copied()
    }

    pub fn len(&self) -> usize {
        self.close.len()
    }

    pub fn is_empty(&self) -> bool {
        self.close.is_empty()
    }

    pub fn is_cash(&self) -> bool {
        self.symbol.is_fiat()
    }

    fn columns_aligned(&self) -> bool {
        let n = self.close.len();
        [
            &self.open,
            &self.high,
            &self.low,
            &self.volume,
            &self.position,
        ]
        .iter()
        .all(|col| col.len() == n)
    }
}

/// Snapshot presented to an agent: one frame per asset, the cash asset last.
///
/// Agents only ever get `&Observation`; any derived series is computed into
/// fresh buffers, so the environment's copy can never be altered by a strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    timestamps: Vec<i64>,
    assets: Vec<AssetFrame>,
}

impl Observation {
    pub fn new(timestamps: Vec<i64>, assets: Vec<AssetFrame>) -> Result<Self, EnvError> {
        let last = assets
            .last()
            .ok_or_else(|| EnvError::market("observation needs at least the cash asset"))?;
        if !last.is_cash() {
            return Err(EnvError::market(format!(
                "cash asset must be last, found {}",
                last.symbol
            )));
        }
        if assets[..assets.len() - 1].iter().any(|a| a.is_cash()) {
            return Err(EnvError::market("cash asset appears more than once"));
        }
        for asset in &assets {
            if asset.len() != timestamps.len() || !asset.columns_aligned() {
                return Err(EnvError::market(format!(
                    "frame for {} does not match {} timestamps",
                    asset.symbol,
                    timestamps.len()
                )));
            }
        }
        Ok(Self { timestamps, assets })
    }

    pub fn assets(&self) -> &[AssetFrame] {
        &self.assets
    }

    /// Non-cash assets in allocation order.
    pub fn tradable(&self) -> impl Iterator<Item = &AssetFrame> {
        self.assets.iter().filter(|a| !a.is_cash())
    }

    pub fn cash(&self) -> &AssetFrame {
        // `new` guarantees a trailing cash frame
        &self.assets[self.assets.len() - 1]
    }

    pub fn asset(&self, symbol: &str) -> Option<&AssetFrame> {
        self.assets.iter().find(|a| a.symbol.0 == symbol)
    }

    pub fn symbols(&self) -> impl Iterator<Item = &Symbol> {
        self.assets.iter().map(|a| &a.symbol)
    }

    /// Number of assets, cash included. Equals the allocation length.
    pub fn n_assets(&self) -> usize {
        self.assets.len()
    }

    /// Number of rows in the window.
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn timestamps(&self) -> &[i64] {
        &self.timestamps
    }

    pub fn last_timestamp(&self) -> Option<i64> {
        self.timestamps.last().copied()
    }
}
