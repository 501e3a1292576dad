use anyhow::{Result, bail};

pub fn split_csv(s: &str) -> Vec<String> {
    s.split(',')
        .map(|x| x.trim().to_string())
        .filter(|x| !x.is_empty())
        .collect()
}

/// Parse seed tokens: decimal, `0x` hex, or negative decimals folded to
/// their magnitude. Defaults to `1337` when nothing is given.
pub fn resolve_seeds(tokens: &[String]) -> Result<Vec<u64>> {
    let mut seeds = Vec::new();
    for token in tokens {
        let seed = if let Some(hex) = token.strip_prefix("0x").or_else(|| token.strip_prefix("0X")) {
            u64::from_str_radix(&hex.replace('_', ""), 16).ok()
        } else if let Ok(value) = token.parse::<i64>() {
            Some(value.unsigned_abs())
        } else {
            token.parse::<u64>().ok()
        };
        match seed {
            Some(seed) if !seeds.contains(&seed) => seeds.push(seed),
            Some(_) => {}
            None => bail!("Unrecognized seed token: {token}"),
        }
    }
    if seeds.is_empty() {
        seeds.push(1337);
    }
    Ok(seeds)
}
