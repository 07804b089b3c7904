//! Child process environment construction
//!
//! Two policies exist. `AllowList` starts from nothing and copies only named
//! variables; `DenyList` copies the parent environment and drops anything that
//! looks like a credential. Deny patterns run last in both modes, then the
//! sandbox's own variables are added.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// How the child environment is seeded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvMode {
    /// Copy only explicitly permitted variables
    #[default]
    AllowList,
    /// Copy everything except credential-like variables
    DenyList,
}

/// Variables copied through in allow-list mode
const SAFE_VARIABLES: &[&str] = &["PATH", "LANG", "LC_ALL", "LC_CTYPE", "TZ", "TERM"];

/// Name prefixes that mark cloud, database, ssh or identity material
const DENY_PREFIXES: &[&str] = &[
    "AWS_", "AZURE_", "GCP_", "GOOGLE_", "GCLOUD_", "CLOUDSDK_", "DO_", "HEROKU_",
    "DATABASE_", "DB_", "POSTGRES", "PG", "MYSQL", "MONGO", "REDIS", "SQL",
    "SSH_", "GPG_", "GNUPG", "KRB5", "SUDO_", "DOCKER_", "KUBE",
    "OPENAI_", "ANTHROPIC_", "HF_", "HUGGING",
];

/// Substrings that mark secrets wherever they appear in a name
const DENY_SUBSTRINGS: &[&str] = &[
    "SECRET", "TOKEN", "PASSWORD", "PASSWD", "PASSPHRASE", "API_KEY", "APIKEY",
    "ACCESS_KEY", "PRIVATE_KEY", "CREDENTIAL", "AUTH", "ENCRYPTION", "KMS", "SESSION_KEY",
    "COOKIE", "SIGNING", "DSN", "CONNECTION_STRING",
];

/// Identity variables removed outright
const IDENTITY_VARIABLES: &[&str] = &["USER", "LOGNAME", "USERNAME", "HOME", "MAIL", "SHELL"];

/// Libraries pinned to a single thread
const THREAD_PINS: &[&str] = &[
    "OMP_NUM_THREADS",
    "OPENBLAS_NUM_THREADS",
    "MKL_NUM_THREADS",
    "NUMEXPR_NUM_THREADS",
    "VECLIB_MAXIMUM_THREADS",
    "BLIS_NUM_THREADS",
];

/// Whether a variable name looks like secret or identity material
pub fn is_sensitive(name: &str) -> bool {
    let upper = name.to_ascii_uppercase();
    IDENTITY_VARIABLES.contains(&upper.as_str())
        || DENY_PREFIXES.iter().any(|p| upper.starts_with(p))
        || DENY_SUBSTRINGS.iter().any(|s| upper.contains(s))
}

/// Build the environment for one sandboxed process
pub fn build_environment<I>(
    parent: I,
    mode: EnvMode,
    extra_allowed: &[String],
    work_dir: &Path,
) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut env: BTreeMap<String, String> = parent
        .into_iter()
        .filter(|(name, _)| match mode {
            EnvMode::DenyList => true,
            EnvMode::AllowList => {
                SAFE_VARIABLES.contains(&name.as_str()) || extra_allowed.iter().any(|a| a == name)
            }
        })
        .collect();

    let before = env.len();
    env.retain(|name, _| !is_sensitive(name));
    let removed = before - env.len();
    if removed > 0 {
        // Names only; values never reach the log
        tracing::debug!(removed, "Redacted sensitive variables from sandbox environment");
    }

    env.entry("PATH".to_string())
        .or_insert_with(|| "/usr/local/bin:/usr/bin:/bin".to_string());

    let work = work_dir.to_string_lossy().into_owned();
    env.insert("HOME".to_string(), work.clone());
    env.insert("TMPDIR".to_string(), work.clone());
    env.insert("MPLCONFIGDIR".to_string(), work);
    env.insert("MPLBACKEND".to_string(), "Agg".to_string());
    env.insert("PYTHONIOENCODING".to_string(), "utf-8".to_string());
    env.insert("PYTHONUNBUFFERED".to_string(), "1".to_string());
    env.insert("PYTHONDONTWRITEBYTECODE".to_string(), "1".to_string());
    for pin in THREAD_PINS {
        env.insert(pin.to_string(), "1".to_string());
    }

    env
}
