//! Host range patterns such as `web[01:20]`, `db-[a:f]` or `node[0:10:2]`.

/// Upper bound on the hosts a single pattern may expand to.
pub const MAX_HOSTS: usize = 1_000_000;

/// Expands every `[start:end(:stride)]` range in `pattern`. A pattern without
/// ranges expands to itself.
pub fn expand_host_pattern(pattern: &str) -> Result<Vec<String>, String> {
    let Some(open) = pattern.find('[') else {
        return Ok(vec![pattern.to_string()]);
    };
    let Some(close) = pattern[open..].find(']').map(|i| open + i) else {
        return Err(format!("unclosed range in host pattern {pattern}"));
    };

    let head = &pattern[..open];
    let body = &pattern[open + 1..close];
    let tail = &pattern[close + 1..];
    if !body.contains(':') {
        return Err(format!("range in host pattern {pattern} should be [start:end]"));
    }

    let tails = expand_host_pattern(tail)?;
    let limit = MAX_HOSTS / tails.len().max(1);
    let mut hosts = Vec::new();
    for item in expand_range(body, limit).map_err(|e| format!("{e} in host pattern {pattern}"))? {
        for tail in &tails {
            hosts.push(format!("{head}{item}{tail}"));
        }
    }
    Ok(hosts)
}

fn expand_range(body: &str, limit: usize) -> Result<Vec<String>, String> {
    let parts: Vec<&str> = body.split(':').collect();
    let (start, end, stride) = match parts.as_slice() {
        [start, end] => (*start, *end, 1),
        [start, end, stride] => {
            let stride: usize = stride
                .parse()
                .map_err(|_| format!("invalid stride {stride}"))?;
            (*start, *end, stride)
        }
        _ => return Err(format!("invalid range [{body}]")),
    };
    if stride == 0 {
        return Err("range stride can't be zero".to_string());
    }
    if start.is_empty() || end.is_empty() {
        return Err(format!("invalid range [{body}]"));
    }

    if let (Ok(from), Ok(to)) = (start.parse::<u64>(), end.parse::<u64>()) {
        let width = if start.len() > 1 && start.starts_with('0') {
            if start.len() != end.len() {
                return Err(
                    "zero-padded range needs start and end of the same length".to_string(),
                );
            }
            start.len()
        } else {
            0
        };
        if from > to {
            return Err(format!("range start {start} is after end {end}"));
        }
        check_count((to - from) / stride as u64 + 1, limit)?;
        return Ok((from..=to)
            .step_by(stride)
            .map(|i| format!("{i:0width$}"))
            .collect());
    }

    let (Some(from), Some(to)) = (single_letter(start), single_letter(end)) else {
        return Err(format!("invalid range [{body}]"));
    };
    if from > to {
        return Err(format!("range start {start} is after end {end}"));
    }
    check_count((to as u64 - from as u64) / stride as u64 + 1, limit)?;
    Ok((from..=to)
        .step_by(stride)
        .map(|c| c.to_string())
        .collect())
}

fn check_count(count: u64, limit: usize) -> Result<(), String> {
    if count > limit as u64 {
        return Err(format!("range expands to more than {MAX_HOSTS} hosts"));
    }
    Ok(())
}

fn single_letter(s: &str) -> Option<char> {
    let mut chars = s.chars();
    let c = chars.next()?;
    (chars.next().is_none() && c.is_ascii_alphabetic()).then_some(c)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_host() {
        assert_eq!(expand_host_pattern("node1").unwrap(), vec!["node1"]);
    }

    #[test]
    fn numeric_range() {
        assert_eq!(
            expand_host_pattern("web[1:3].example.com").unwrap(),
            vec!["web1.example.com", "web2.example.com", "web3.example.com"]
        );
    }

    #[test]
    fn padded_range_with_stride() {
        assert_eq!(
            expand_host_pattern("node[01:07:3]").unwrap(),
            vec!["node01", "node04", "node07"]
        );
    }

    #[test]
    fn alpha_range() {
        assert_eq!(
            expand_host_pattern("db-[a:c]").unwrap(),
            vec!["db-a", "db-b", "db-c"]
        );
    }

    #[test]
    fn multiple_ranges() {
        assert_eq!(
            expand_host_pattern("r[1:2]n[a:b]").unwrap(),
            vec!["r1na", "r1nb", "r2na", "r2nb"]
        );
    }

    #[test]
    fn invalid_ranges() {
        assert!(expand_host_pattern("web[3:1]").is_err());
        assert!(expand_host_pattern("web[01:100]").is_err());
        assert!(expand_host_pattern("web[1:3").is_err());
        assert!(expand_host_pattern("web[1:3:0]").is_err());
        assert!(expand_host_pattern("web[a:10]").is_err());
    }

    #[test]
    fn oversized_range_is_rejected() {
        let e = expand_host_pattern("h[0:9999999999]").unwrap_err();
        assert!(e.contains("more than 1000000 hosts"), "{e}");
        // each range alone fits, their product doesn't
        assert!(expand_host_pattern("h[1:2000]x[1:1000]").is_err());
        assert_eq!(expand_host_pattern("h[1:1000]x[1:1000]").unwrap().len(), 1_000_000);
    }
}
