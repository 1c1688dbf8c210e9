use anyhow::Result;

/// Read a ticker-list file from `path`.
///
/// The first line is a header and is discarded; every following non-blank
/// line is one ticker symbol, uppercased.
///
/// ```text
/// Symbol
/// AAPL
/// MSFT
/// ```
pub async fn read_tickers(path: &str) -> Result<Vec<String>> {
    let raw = tokio::fs::read_to_string(path).await?;
    let tickers = raw
        .lines()
        .skip(1)
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_uppercase)
        .collect();
    Ok(tickers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn header_and_blanks_are_discarded() {
        let path = std::env::temp_dir().join("lode_tickers_test.csv");
        tokio::fs::write(&path, "Symbol\nAAPL\n\n msft \n")
            .await
            .unwrap();

        let tickers = read_tickers(path.to_str().unwrap()).await.unwrap();
        assert_eq!(tickers, vec!["AAPL".to_string(), "MSFT".to_string()]);

        tokio::fs::remove_file(&path).await.unwrap();
    }
}
