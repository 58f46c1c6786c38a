use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};

use crate::client::ClientConfig;

pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_MAX_WORKERS: usize = 10;

#[derive(Debug, Default)]
struct RcConfig {
    url: Option<String>,
    service_token: Option<String>,
    user_token: Option<String>,
    collection_id: Option<String>,
    verify: Option<bool>,
    batch_size: Option<String>,
    max_workers: Option<String>,
}

pub(crate) fn load_config(
    url: Option<String>,
    service_token: Option<String>,
    verify: Option<bool>,
) -> Result<ClientConfig> {
    resolve(
        url,
        service_token,
        verify,
        |name| std::env::var(name).ok(),
        &rc_candidates(),
    )
}

fn resolve(
    url: Option<String>,
    service_token: Option<String>,
    verify: Option<bool>,
    env: impl Fn(&str) -> Option<String>,
    rc_candidates: &[PathBuf],
) -> Result<ClientConfig> {
    let mut rc = RcConfig::default();
    if let Some(rc_path) = rc_candidates.iter().find(|p| p.exists()) {
        rc = read_rc(rc_path).with_context(|| {
            format!("failed to read configuration file {}", rc_path.display())
        })?;
    }

    let Some(url) = url.or_else(|| env("DP_API_URL")).or(rc.url) else {
        if rc_candidates.is_empty() {
            bail!("Missing configuration: url (set DP_API_URL or create .dpapirc)");
        }
        bail!(
            "Missing configuration: url (set DP_API_URL or put `url:` in one of: {})",
            rc_candidates
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
    };

    let batch_size = match env("DP_BATCH_SIZE").or(rc.batch_size) {
        Some(v) => parse_size("batch_size", &v)?,
        None => DEFAULT_BATCH_SIZE,
    };
    let max_workers = match env("DP_MAX_WORKERS").or(rc.max_workers) {
        Some(v) => parse_size("max_workers", &v)?,
        None => DEFAULT_MAX_WORKERS,
    };

    Ok(ClientConfig {
        url,
        service_token: service_token
            .or_else(|| env("DP_SERVICE_AUTH_TOKEN"))
            .or(rc.service_token),
        user_token: env("DP_USER_AUTH_TOKEN").or(rc.user_token),
        collection_id: env("DP_COLLECTION_ID").or(rc.collection_id),
        verify: verify.or(rc.verify).unwrap_or(true),
        batch_size,
        max_workers,
    })
}

fn parse_size(name: &str, value: &str) -> Result<usize> {
    let n: usize = value
        .trim()
        .parse()
        .with_context(|| format!("invalid {}: {:?} is not a positive integer", name, value))?;
    if n == 0 {
        bail!("invalid {}: must be greater than zero", name);
    }
    Ok(n)
}

fn read_rc(path: &Path) -> Result<RcConfig> {
    let text = std::fs::read_to_string(path)?;
    Ok(parse_rc(&text))
}

fn parse_rc(text: &str) -> RcConfig {
    let mut cfg = RcConfig::default();

    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once(':') else {
            continue;
        };
        let v = strip_quotes(v.trim());
        if v.is_empty() {
            continue;
        }
        let v = Some(v.to_string());
        match k.trim() {
            "url" => cfg.url = v,
            "service_token" => cfg.service_token = v,
            "user_token" => cfg.user_token = v,
            "collection_id" => cfg.collection_id = v,
            "verify" => cfg.verify = v.map(|v| v != "0" && v != "false"),
            "batch_size" => cfg.batch_size = v,
            "max_workers" => cfg.max_workers = v,
            _ => {}
        }
    }

    cfg
}

fn strip_quotes(s: &str) -> &str {
    let s = s.trim();
    if (s.starts_with('"') && s.ends_with('"') && s.len() >= 2)
        || (s.starts_with('\'') && s.ends_with('\'') && s.len() >= 2)
    {
        &s[1..s.len() - 1]
    } else {
        s
    }
}

fn rc_candidates() -> Vec<PathBuf> {
    // 1) DP_API_RC (explicit)
    // 2) ./.dpapirc
    // 3) ~/.dpapirc
    if let Ok(p) = std::env::var("DP_API_RC") {
        return vec![PathBuf::from(p)];
    }

    let mut v = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        v.push(cwd.join(".dpapirc"));
    }
    if let Some(home) = dirs::home_dir() {
        v.push(home.join(".dpapirc"));
    }
    v
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env_of(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    fn rc_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn parses_rc_lines() {
        let cfg = parse_rc(
            "# dataset api\nurl: \"http://localhost:22000\"\nservice_token: 'abc'\nverify: 0\nbatch_size: 50\nunknown: x\nmax_workers:\n",
        );
        assert_eq!(cfg.url.as_deref(), Some("http://localhost:22000"));
        assert_eq!(cfg.service_token.as_deref(), Some("abc"));
        assert_eq!(cfg.verify, Some(false));
        assert_eq!(cfg.batch_size.as_deref(), Some("50"));
        assert_eq!(cfg.max_workers, None);
    }

    #[test]
    fn explicit_beats_env_beats_rc() {
        let rc = rc_file("url: http://rc\nservice_token: rc-token\ncollection_id: rc-coll\n");
        let candidates = vec![rc.path().to_path_buf()];

        let cfg = resolve(
            None,
            None,
            None,
            env_of(&[("DP_API_URL", "http://env"), ("DP_COLLECTION_ID", "env-coll")]),
            &candidates,
        )
        .unwrap();
        assert_eq!(cfg.url, "http://env");
        assert_eq!(cfg.service_token.as_deref(), Some("rc-token"));
        assert_eq!(cfg.collection_id.as_deref(), Some("env-coll"));
        assert!(cfg.verify);

        let cfg = resolve(
            Some("http://explicit".into()),
            Some("explicit-token".into()),
            Some(false),
            env_of(&[("DP_API_URL", "http://env")]),
            &candidates,
        )
        .unwrap();
        assert_eq!(cfg.url, "http://explicit");
        assert_eq!(cfg.service_token.as_deref(), Some("explicit-token"));
        assert!(!cfg.verify);
    }

    #[test]
    fn first_existing_rc_wins() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join(".dpapirc");
        let rc = rc_file("url: http://second\n");

        let cfg = resolve(
            None,
            None,
            None,
            env_of(&[]),
            &[missing, rc.path().to_path_buf()],
        )
        .unwrap();
        assert_eq!(cfg.url, "http://second");
    }

    #[test]
    fn sizes_default_and_validate() {
        let cfg = resolve(Some("http://x".into()), None, None, env_of(&[]), &[]).unwrap();
        assert_eq!(cfg.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(cfg.max_workers, DEFAULT_MAX_WORKERS);

        let cfg = resolve(
            Some("http://x".into()),
            None,
            None,
            env_of(&[("DP_BATCH_SIZE", "250"), ("DP_MAX_WORKERS", " 4 ")]),
            &[],
        )
        .unwrap();
        assert_eq!(cfg.batch_size, 250);
        assert_eq!(cfg.max_workers, 4);

        let err = resolve(
            Some("http://x".into()),
            None,
            None,
            env_of(&[("DP_MAX_WORKERS", "0")]),
            &[],
        )
        .unwrap_err();
        assert!(err.to_string().contains("max_workers"));

        let err = resolve(
            Some("http://x".into()),
            None,
            None,
            env_of(&[("DP_BATCH_SIZE", "lots")]),
            &[],
        )
        .unwrap_err();
        assert!(err.to_string().contains("batch_size"));
    }

    #[test]
    fn missing_url_names_the_rc_locations() {
        let dir = tempfile::tempdir().unwrap();
        let candidate = dir.path().join(".dpapirc");
        let err = resolve(None, None, None, env_of(&[]), &[candidate.clone()]).unwrap_err();
        let msg = err.to_string();
        assert!(msg.starts_with("Missing configuration: url"));
        assert!(msg.contains(&candidate.display().to_string()));
    }
}
