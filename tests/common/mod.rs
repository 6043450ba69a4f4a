//! Content-addressed test fixtures.
//!
//! Blobs live in `testdata-cas/sha256-<digest>` under the crate root, or
//! under `SEGSPLIT_CAS_DIR` when set.  A missing blob is pulled anonymously
//! from the `testdata-cas` OCI repository on ghcr.io.  Every blob is checked
//! against its digest before a test sees it.

use sha2::{Digest, Sha256};
use std::error::Error;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

const REGISTRY:   &str = "ghcr.io";
const REPOSITORY: &str = "katexochen/image-tools/testdata-cas";
const TIMEOUT:    Duration = Duration::from_secs(120);

pub fn sha256_file(path: &Path) -> String {
    let mut hasher = Sha256::new();
    io::copy(&mut File::open(path).unwrap(), &mut hasher).unwrap();
    hex::encode(hasher.finalize())
}

pub fn cas_dir() -> PathBuf {
    std::env::var_os("SEGSPLIT_CAS_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| Path::new(env!("CARGO_MANIFEST_DIR")).join("testdata-cas"))
}

/// Verified local path of the blob with sha256 `digest` in the default cache.
pub fn fetch(digest: &str) -> Result<PathBuf, Box<dyn Error>> {
    fetch_in(&cas_dir(), digest)
}

/// Verified local path of `digest` in `dir`, downloading it first if absent.
///
/// `Err` means the blob is not cached and could not be downloaded.  A cached
/// blob whose content does not match its name panics.
pub fn fetch_in(dir: &Path, digest: &str) -> Result<PathBuf, Box<dyn Error>> {
    let target = dir.join(format!("sha256-{digest}"));
    if !target.exists() {
        fs::create_dir_all(dir)?;
        download(dir, digest, &target)?;
    }
    assert_eq!(sha256_file(&target), digest, "corrupt cached blob {}", target.display());
    Ok(target)
}

fn download(dir: &Path, digest: &str, target: &Path) -> Result<(), Box<dyn Error>> {
    let agent = ureq::AgentBuilder::new().timeout(TIMEOUT).build();

    let token_url = format!("https://{REGISTRY}/token?scope=repository:{REPOSITORY}:pull");
    let auth: serde_json::Value = serde_json::from_reader(agent.get(&token_url).call()?.into_reader())?;
    let token = auth["token"].as_str().ok_or("registry returned no pull token")?;

    let blob_url = format!("https://{REGISTRY}/v2/{REPOSITORY}/blobs/sha256:{digest}");
    let blob = agent
        .get(&blob_url)
        .set("Authorization", &format!("Bearer {token}"))
        .call()?;

    // Land in the cache under the final name only once the digest matches.
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    io::copy(&mut blob.into_reader(), &mut tmp)?;
    let got = sha256_file(tmp.path());
    if got != digest {
        return Err(format!("downloaded blob has digest {got}, want {digest}").into());
    }
    tmp.persist(target)?;
    Ok(())
}
