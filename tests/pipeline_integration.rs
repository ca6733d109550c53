//! End-to-end pipeline tests against the directory-backed stand-in store
//! and the in-memory source host.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use tempfile::TempDir;

use dist_promote::cancel::CancelToken;
use dist_promote::config::Config;
use dist_promote::github::MockHost;
use dist_promote::manifest::{sha256_hex, ReleaseManifest, ReleaseMarker};
use dist_promote::pipeline::{ErrorClass, Pipeline, PipelineOutcome};
use dist_promote::signer::{encode_signing_key, generate_signing_key, ManifestSignature, Signer};
use dist_promote::store::{FsStore, ObjectStore, PutOptions, StoreError};

const COMMIT_A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
const COMMIT_B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
const LINUX: &str = "x86_64-unknown-linux-gnu";
const DATE: &str = "2020-10-08";

/// Counts puts going through to the wrapped store
struct CountingStore {
    inner: FsStore,
    puts: AtomicUsize,
}

impl CountingStore {
    fn new(inner: FsStore) -> Self {
        Self {
            inner,
            puts: AtomicUsize::new(0),
        }
    }

    fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }
}

impl ObjectStore for CountingStore {
    fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.inner.exists(key)
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        self.inner.get(key)
    }

    fn put(&self, key: &str, bytes: &[u8], options: &PutOptions) -> Result<(), StoreError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.inner.put(key, bytes, options)
    }
}

/// Fails every put whose key contains the given fragment
struct FailingStore {
    inner: FsStore,
    fail_on: String,
}

impl ObjectStore for FailingStore {
    fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.inner.exists(key)
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        self.inner.get(key)
    }

    fn put(&self, key: &str, bytes: &[u8], options: &PutOptions) -> Result<(), StoreError> {
        if key.contains(&self.fail_on) {
            return Err(StoreError::Command(format!("injected failure on {}", key)));
        }
        self.inner.put(key, bytes, options)
    }
}

/// A `.tar.xz` archive holding `{top_dir}/version`
fn make_tarball(top_dir: &str, version_contents: &str) -> Vec<u8> {
    let encoder = xz2::write::XzEncoder::new(Vec::new(), 6);
    let mut builder = tar::Builder::new(encoder);

    let data = version_contents.as_bytes();
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append_data(&mut header, format!("{}/version", top_dir), data)
        .unwrap();

    builder.into_inner().unwrap().finish().unwrap()
}

struct Fixture {
    /// Owns every temporary directory for the run
    _dirs: Vec<TempDir>,
    config: Config,
    upstream: FsStore,
    public_root: PathBuf,
}

impl Fixture {
    fn new(channel: &str, commit: &str) -> Self {
        let upstream_dir = TempDir::new().unwrap();
        let public_dir = TempDir::new().unwrap();
        let work_dir = TempDir::new().unwrap();
        let key_dir = TempDir::new().unwrap();

        let key_path = key_dir.path().join("release.b64");
        std::fs::write(&key_path, encode_signing_key(&generate_signing_key())).unwrap();

        let config = Config {
            channel: channel.parse().unwrap(),
            override_commit: Some(commit.to_string()),
            repository: "rust-lang/rust".to_string(),
            github_token: None,
            download_bucket: "ci-artifacts".to_string(),
            download_prefix: "builds".to_string(),
            upload_bucket: "static-dist".to_string(),
            upload_prefix: "dist".to_string(),
            storage_class: "STANDARD".to_string(),
            cache_control: None,
            endpoint_url: None,
            targets: vec![LINUX.to_string(), "aarch64-apple-darwin".to_string()],
            required_target: LINUX.to_string(),
            components: vec![
                "rustc".to_string(),
                "cargo".to_string(),
                "rust-docs".to_string(),
            ],
            required_components: vec!["rustc".to_string()],
            authoritative_component: "rustc".to_string(),
            derived_version_components: vec!["cargo".to_string()],
            derived_version_override: None,
            recompress_gz: false,
            recompress_xz: false,
            gzip_level: 6,
            xz_preset: 1,
            key_path,
            passphrase_path: None,
            cloudfront_distributions: Vec::new(),
            fastly_service_id: None,
            fastly_api_token: None,
            work_dir: work_dir.path().to_path_buf(),
            num_threads: 0,
            retry_attempts: 1,
            retry_base_delay_ms: 1,
            http_timeout_secs: 1,
            bypass_marker_check: false,
            skip_invalidations: true,
            skip_cleanup: false,
        };

        let upstream = FsStore::new(upstream_dir.path());
        let public_root = public_dir.path().to_path_buf();

        Self {
            _dirs: vec![upstream_dir, public_dir, work_dir, key_dir],
            config,
            upstream,
            public_root,
        }
    }

    fn stage_upstream(&self, commit: &str, file_name: &str, bytes: &[u8]) {
        self.upstream
            .put(
                &format!("builds/{}/{}", commit, file_name),
                bytes,
                &PutOptions::default(),
            )
            .unwrap();
    }

    fn public(&self) -> FsStore {
        FsStore::new(&self.public_root)
    }

    fn run(&self, host: &MockHost, public: &dyn ObjectStore) -> Result<PipelineOutcome, dist_promote::PipelineError> {
        Pipeline::new(&self.config, host, &self.upstream, public, CancelToken::new())
            .with_date(DATE)
            .run()
    }
}

#[test]
fn test_nightly_scenario_single_component() {
    // Only the required target's compiler is staged; every other
    // (component, target) pair is skipped with a warning.
    let fixture = Fixture::new("nightly", COMMIT_A);
    fixture.stage_upstream(
        COMMIT_A,
        &format!("rustc-nightly-{}.tar.xz", LINUX),
        b"rustc nightly bytes",
    );
    let public = fixture.public();

    let outcome = fixture.run(&MockHost::new(), &public).unwrap();
    match outcome {
        PipelineOutcome::Published { commit, version, .. } => {
            assert_eq!(commit, COMMIT_A);
            assert_eq!(version, "nightly");
        }
        other => panic!("expected a publish, got {:?}", other),
    }

    // One target, one component.
    let manifest_bytes = public.get("dist/channel-nightly.json").unwrap();
    let manifest = ReleaseManifest::from_json(std::str::from_utf8(&manifest_bytes).unwrap()).unwrap();
    assert_eq!(manifest.targets.len(), 1);
    assert_eq!(manifest.targets[LINUX].len(), 1);
    assert!(manifest.targets[LINUX].contains_key("rustc"));

    // The signature verifies over exactly the published manifest bytes.
    let signature_bytes = public.get("dist/channel-nightly.json.sig").unwrap();
    let signature =
        ManifestSignature::from_json(std::str::from_utf8(&signature_bytes).unwrap()).unwrap();
    let signer = Signer::from_files(&fixture.config.key_path, None).unwrap();
    assert!(signature
        .verify(&signer.verifying_key(), &manifest_bytes)
        .unwrap());

    // The marker records the resolved commit.
    let marker = ReleaseMarker::load(&public, "dist", "nightly")
        .unwrap()
        .expect("marker written");
    assert!(marker.matches(COMMIT_A, "nightly"));
}

#[test]
fn test_second_run_short_circuits_with_zero_writes() {
    let fixture = Fixture::new("nightly", COMMIT_A);
    fixture.stage_upstream(
        COMMIT_A,
        &format!("rustc-nightly-{}.tar.xz", LINUX),
        b"rustc nightly bytes",
    );
    let public = CountingStore::new(fixture.public());
    let host = MockHost::new();

    let first = fixture.run(&host, &public).unwrap();
    assert!(matches!(first, PipelineOutcome::Published { .. }));
    let writes_after_first = public.put_count();
    assert!(writes_after_first > 0);

    let second = fixture.run(&host, &public).unwrap();
    assert!(matches!(second, PipelineOutcome::ShortCircuit { .. }));
    assert_eq!(public.put_count(), writes_after_first);
}

#[test]
fn test_bypassed_marker_check_republishes() {
    let mut fixture = Fixture::new("nightly", COMMIT_A);
    fixture.stage_upstream(
        COMMIT_A,
        &format!("rustc-nightly-{}.tar.xz", LINUX),
        b"rustc nightly bytes",
    );
    let public = fixture.public();
    let host = MockHost::new();

    fixture.run(&host, &public).unwrap();

    fixture.config.bypass_marker_check = true;
    let again = fixture.run(&host, &public).unwrap();
    assert!(matches!(again, PipelineOutcome::Published { .. }));
}

#[test]
fn test_publish_failure_leaves_previous_marker_intact() {
    // Publish commit A completely, then fail commit B's manifest write.
    let fixture = Fixture::new("nightly", COMMIT_A);
    fixture.stage_upstream(
        COMMIT_A,
        &format!("rustc-nightly-{}.tar.xz", LINUX),
        b"rustc from commit A",
    );
    let host = MockHost::new();
    fixture.run(&host, &fixture.public()).unwrap();

    let mut fixture_b = Fixture::new("nightly", COMMIT_B);
    fixture_b.config.work_dir = fixture.config.work_dir.clone();
    fixture_b.config.key_path = fixture.config.key_path.clone();
    fixture_b.stage_upstream(
        COMMIT_B,
        &format!("rustc-nightly-{}.tar.xz", LINUX),
        b"rustc from commit B",
    );
    let failing = FailingStore {
        inner: fixture.public(),
        fail_on: "channel-nightly.json".to_string(),
    };

    let err = fixture_b.run(&host, &failing).unwrap_err();
    assert_eq!(err.class(), ErrorClass::Publish);

    // Readers still see the complete commit A release.
    let marker = ReleaseMarker::load(&fixture.public(), "dist", "nightly")
        .unwrap()
        .expect("previous marker survives");
    assert!(marker.matches(COMMIT_A, "nightly"));
}

#[test]
fn test_missing_required_artifact_fails_before_any_public_write() {
    let fixture = Fixture::new("nightly", COMMIT_A);
    // Stage only an optional component; the required compiler is absent.
    fixture.stage_upstream(
        COMMIT_A,
        &format!("cargo-nightly-{}.tar.xz", LINUX),
        b"cargo bytes",
    );
    let public = CountingStore::new(fixture.public());

    let err = fixture.run(&MockHost::new(), &public).unwrap_err();
    assert_eq!(err.class(), ErrorClass::Data);
    assert_eq!(public.put_count(), 0);
    assert!(ReleaseMarker::load(&fixture.public(), "dist", "nightly")
        .unwrap()
        .is_none());
}

#[test]
fn test_published_checksums_match_published_bytes() {
    let fixture = Fixture::new("nightly", COMMIT_A);
    fixture.stage_upstream(
        COMMIT_A,
        &format!("rustc-nightly-{}.tar.xz", LINUX),
        b"rustc nightly bytes",
    );
    fixture.stage_upstream(
        COMMIT_A,
        &format!("cargo-nightly-{}.tar.xz", LINUX),
        b"cargo nightly bytes",
    );
    let public = fixture.public();
    fixture.run(&MockHost::new(), &public).unwrap();

    // Round-trip: fetch every object the manifest lists, hash, compare.
    let manifest_bytes = public.get("dist/channel-nightly.json").unwrap();
    let manifest = ReleaseManifest::from_json(std::str::from_utf8(&manifest_bytes).unwrap()).unwrap();
    assert!(manifest.file_count() >= 2);
    assert!(manifest.verify_published(&public).unwrap().is_empty());
}

#[test]
fn test_stable_version_from_legacy_metadata_and_derived_cargo() {
    let fixture = Fixture::new("stable", COMMIT_A);
    let host = MockHost::new().with_file(
        COMMIT_A,
        "src/bootstrap/channel.rs",
        r#"pub const CFG_RELEASE_NUM: &str = "1.47.0";"#,
    );

    let rustc_dir = format!("rustc-1.47.0-{}", LINUX);
    fixture.stage_upstream(
        COMMIT_A,
        &format!("rustc-1.47.0-{}.tar.xz", LINUX),
        &make_tarball(&rustc_dir, "1.47.0 (18bf6b4f0 2020-10-07)\n"),
    );
    // The package manager is fetched under its derived version.
    fixture.stage_upstream(
        COMMIT_A,
        &format!("cargo-0.48.0-{}.tar.xz", LINUX),
        b"cargo stable bytes",
    );

    let public = fixture.public();
    let outcome = fixture.run(&host, &public).unwrap();
    match outcome {
        PipelineOutcome::Published { version, .. } => assert_eq!(version, "1.47.0"),
        other => panic!("expected a publish, got {:?}", other),
    }

    let manifest_bytes = public.get("dist/channel-stable.json").unwrap();
    let manifest = ReleaseManifest::from_json(std::str::from_utf8(&manifest_bytes).unwrap()).unwrap();
    assert_eq!(manifest.version, "1.47.0");
    let cargo_entry = &manifest.targets[LINUX]["cargo"].files["xz"];
    assert_eq!(
        cargo_entry.path,
        format!("dist/{}/cargo-0.48.0-{}.tar.xz", DATE, LINUX)
    );
}

#[test]
fn test_stable_version_mismatch_is_fatal() {
    let fixture = Fixture::new("stable", COMMIT_A);
    let host = MockHost::new().with_file(COMMIT_A, "src/version", "1.47.0\n");

    // The staged compiler claims a different version than the source tree.
    let rustc_dir = format!("rustc-1.47.0-{}", LINUX);
    fixture.stage_upstream(
        COMMIT_A,
        &format!("rustc-1.47.0-{}.tar.xz", LINUX),
        &make_tarball(&rustc_dir, "1.46.0 (old build)\n"),
    );

    let public = CountingStore::new(fixture.public());
    let err = fixture.run(&host, &public).unwrap_err();
    assert_eq!(err.class(), ErrorClass::Data);
    assert_eq!(public.put_count(), 0);
}

#[test]
fn test_stable_override_without_recompression_keeps_original_bytes() {
    let fixture = Fixture::new("stable", COMMIT_A);
    let host = MockHost::new().with_file(COMMIT_A, "src/version", "1.47.0\n");

    let rustc_dir = format!("rustc-1.47.0-{}", LINUX);
    let original = make_tarball(&rustc_dir, "1.47.0 (18bf6b4f0 2020-10-07)\n");
    fixture.stage_upstream(
        COMMIT_A,
        &format!("rustc-1.47.0-{}.tar.xz", LINUX),
        &original,
    );

    let public = fixture.public();
    fixture.run(&host, &public).unwrap();

    let published = public
        .get(&format!("dist/{}/rustc-1.47.0-{}.tar.xz", DATE, LINUX))
        .unwrap();
    assert_eq!(published, original);

    let manifest_bytes = public.get("dist/channel-stable.json").unwrap();
    let manifest = ReleaseManifest::from_json(std::str::from_utf8(&manifest_bytes).unwrap()).unwrap();
    let entry = &manifest.targets[LINUX]["rustc"].files["xz"];
    assert_eq!(entry.sha256, sha256_hex(&original));

    // No gz variant was produced.
    assert!(!public
        .exists(&format!("dist/rustc-1.47.0-{}.tar.gz", LINUX))
        .unwrap());
}

#[test]
fn test_recompression_publishes_gz_variants() {
    let mut fixture = Fixture::new("nightly", COMMIT_A);
    fixture.config.recompress_gz = true;

    let rustc_dir = format!("rustc-nightly-{}", LINUX);
    fixture.stage_upstream(
        COMMIT_A,
        &format!("rustc-nightly-{}.tar.xz", LINUX),
        &make_tarball(&rustc_dir, "nightly build\n"),
    );

    let public = fixture.public();
    fixture.run(&MockHost::new(), &public).unwrap();

    assert!(public
        .exists(&format!("dist/{}/rustc-nightly-{}.tar.gz", DATE, LINUX))
        .unwrap());

    let manifest_bytes = public.get("dist/channel-nightly.json").unwrap();
    let manifest = ReleaseManifest::from_json(std::str::from_utf8(&manifest_bytes).unwrap()).unwrap();
    let rustc = &manifest.targets[LINUX]["rustc"];
    assert!(rustc.files.contains_key("xz"));
    assert!(rustc.files.contains_key("gz"));
    assert!(manifest.verify_published(&public).unwrap().is_empty());
}

#[test]
fn test_plan_reports_without_writing() {
    let fixture = Fixture::new("nightly", COMMIT_A);
    fixture.stage_upstream(
        COMMIT_A,
        &format!("rustc-nightly-{}.tar.xz", LINUX),
        b"rustc nightly bytes",
    );
    let public = CountingStore::new(fixture.public());
    let host = MockHost::new();

    let pipeline = Pipeline::new(
        &fixture.config,
        &host,
        &fixture.upstream,
        &public,
        CancelToken::new(),
    );
    let outcome = pipeline.plan().unwrap();
    assert_eq!(outcome.commit, COMMIT_A);
    assert!(!outcome.already_published);
    assert_eq!(public.put_count(), 0);

    // After a real run, plan reports the no-op.
    fixture.run(&host, &public).unwrap();
    let outcome = pipeline.plan().unwrap();
    assert!(outcome.already_published);
}

#[test]
fn test_missing_version_metadata_fails_without_writes() {
    let fixture = Fixture::new("stable", COMMIT_A);
    // Source tree has neither the canonical nor the legacy version file.
    let host = MockHost::new();
    let public = CountingStore::new(fixture.public());

    let err = fixture.run(&host, &public).unwrap_err();
    assert_eq!(err.class(), ErrorClass::Data);
    assert_eq!(public.put_count(), 0);
}

#[test]
fn test_staging_cache_survives_between_runs() {
    // Failed runs leave the staging cache behind; the retry fetches
    // nothing new from upstream but still publishes.
    let mut fixture = Fixture::new("nightly", COMMIT_A);
    fixture.config.skip_cleanup = true;
    fixture.stage_upstream(
        COMMIT_A,
        &format!("rustc-nightly-{}.tar.xz", LINUX),
        b"rustc nightly bytes",
    );
    let host = MockHost::new();

    // First attempt dies on the manifest write.
    let failing = FailingStore {
        inner: fixture.public(),
        fail_on: "channel-nightly.json".to_string(),
    };
    fixture.run(&host, &failing).unwrap_err();

    // Upstream disappears; the retry must succeed purely from the cache.
    let key = format!("builds/{}/rustc-nightly-{}.tar.xz", COMMIT_A, LINUX);
    std::fs::remove_file(Path::new(fixture.upstream.root()).join(&key)).unwrap();

    let outcome = fixture.run(&host, &fixture.public()).unwrap();
    assert!(matches!(outcome, PipelineOutcome::Published { .. }));
}
