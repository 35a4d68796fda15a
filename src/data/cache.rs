use crate::domain::{Candle, Symbol};
use std::collections::BTreeSet;
use std::path::Path;

/// Save candles to a CSV cache file
pub fn save_to_csv(candles: &[Candle], path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let mut writer = csv::Writer::from_path(path)?;

    writer.write_record([
        "open_time",
        "open",
        "high",
        "low",
        "close",
        "volume",
        "close_time",
    ])?;

    for c in candles {
        writer.write_record(&[
            c.open_time.to_string(),
            c.open.to_string(),
            c.high.to_string(),
            c.low.to_string(),
            c.close.to_string(),
            c.volume.to_string(),
            c.close_time.to_string(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

/// Load candles from a CSV cache file
pub fn load_from_csv(path: &str) -> Result<Vec<Candle>, Box<dyn std::error::Error>> {
    if !Path::new(path).exists() {
        return Err(format!("Cache file not found: {}", path).into());
    }

    let mut reader = csv::Reader::from_path(path)?;
    let mut candles = Vec::new();

    for result in reader.records() {
        let record = result?;
        if record.len() < 7 {
            return Err(format!(
                "{}: expected 7 columns, found {} on line {}",
                path,
                record.len(),
                candles.len() + 2
            )
            .into());
        }
        candles.push(Candle {
            open_time: record[0].parse()?,
            open: record[1].parse()?,
            high: record[2].parse()?,
            low: record[3].parse()?,
            close: record[4].parse()?,
            volume: record[5].parse()?,
            close_time: record[6].parse()?,
        });
    }

    // Verify temporal ordering
    for i in 1..candles.len() {
        if candles[i].open_time <= candles[i - 1].open_time {
            return Err(format!("{}: non-monotonic timestamps at line {}", path, i + 2).into());
        }
    }

    Ok(candles)
}

/// Parse a `SYMBOL=path` data argument.
pub fn parse_source(arg: &str) -> Result<(Symbol, String), String> {
    match arg.split_once('=') {
        Some((symbol, path)) if !symbol.trim().is_empty() && !path.trim().is_empty() => {
            Ok((Symbol::new(symbol.trim().to_uppercase()), path.trim().to_string()))
        }
        _ => Err(format!("expected SYMBOL=path, got `{}`", arg)),
    }
}

/// Load every source and keep only the bars all symbols share.
pub fn load_series(
    sources: &[(Symbol, String)],
) -> Result<Vec<(Symbol, Vec<Candle>)>, Box<dyn std::error::Error>> {
    let mut series = Vec::with_capacity(sources.len());
    for (symbol, path) in sources {
        let candles = load_from_csv(path)?;
        println!("Loaded {} candles for {} from {}", candles.len(), symbol, path);
        series.push((symbol.clone(), candles));
    }
    Ok(align_series(series))
}

/// Restrict every series to the open times present in all of them.
pub fn align_series(series: Vec<(Symbol, Vec<Candle>)>) -> Vec<(Symbol, Vec<Candle>)> {
    let mut common: Option<BTreeSet<i64>> = None;
    for (_, candles) in &series {
        let times: BTreeSet<i64> = candles.iter().map(|c| c.open_time).collect();
        common = Some(match common {
            Some(acc) => acc.intersection(&times).copied().collect(),
            None => times,
        });
    }
    let common = common.unwrap_or_default();

    series
        .into_iter()
        .map(|(symbol, candles)| {
            let kept = candles
                .into_iter()
                .filter(|c| common.contains(&c.open_time))
                .collect();
            (symbol, kept)
        })
        .collect()
}

/// Median spacing between consecutive bars, in milliseconds.
pub fn bar_interval_ms(candles: &[Candle]) -> Option<i64> {
    let mut gaps: Vec<i64> = candles
        .windows(2)
        .map(|w| w[1].open_time - w[0].open_time)
        .collect();
    if gaps.is_empty() {
        return None;
    }
    gaps.sort_unstable();
    Some(gaps[gaps.len() / 2])
}
