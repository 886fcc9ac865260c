// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::{collections::HashMap, env, path::PathBuf, process, sync::Mutex};

use once_cell::sync::OnceCell;

/// This crate builds whole binaries with cargo so that tests can crash them for real, which a
/// `#[test]` running inside the harness process cannot do.
///
/// The main entrypoint is `fn build_artifacts` which takes a list of artifacts to build, invokes
/// cargo and returns the path of each built artifact.
///
/// Builds are cached between invocations so that multiple tests can use the same artifact
/// without doing expensive work twice.
///
/// It is assumed that functions in this crate are invoked in the context of a cargo #[test]
/// item, to be able to locate artifacts built by cargo from the position of the current binary.

#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum BuildProfile {
    Debug,
    Release,
}

#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub struct ArtifactsBuild {
    /// Name of a `[[bin]]` target, built with `--bin`
    pub name: String,
    pub build_profile: BuildProfile,
}

impl ArtifactsBuild {
    /// The crash logger test binary of this crate.
    pub fn crashlog_bin_test(build_profile: BuildProfile) -> Self {
        Self {
            name: "crashlog_bin_test".to_owned(),
            build_profile,
        }
    }
}

fn inner_build_artifact(c: &ArtifactsBuild) -> anyhow::Result<PathBuf> {
    let mut build_cmd = process::Command::new(env!("CARGO"));
    build_cmd.arg("build");
    if let BuildProfile::Release = c.build_profile {
        build_cmd.arg("--release");
    }
    build_cmd.arg("--bin").arg(&c.name);

    let output = build_cmd.output()?;
    if !output.status.success() {
        anyhow::bail!(
            "Cargo build failed: status code {:?}\nstderr:\n {}",
            output.status.code(),
            String::from_utf8_lossy(&output.stderr)
        );
    }

    /// This static variable contains the path in which cargo puts it's build artifacts
    /// This relies on the assumption that the current binary is assumed to not have been moved from
    /// it's directory
    static ARTIFACT_DIR: OnceCell<PathBuf> = OnceCell::new();
    let artifact_dir = ARTIFACT_DIR.get_or_try_init(|| {
        let test_bin_location = PathBuf::from(
            env::args()
                .next()
                .ok_or_else(|| anyhow::anyhow!("missing argv[0]"))?,
        );
        let mut location_components = test_bin_location.components().rev().peekable();
        loop {
            let Some(c) = location_components.peek() else {
                break;
            };
            if c.as_os_str() == "target" {
                break;
            }
            location_components.next();
        }
        anyhow::Ok(location_components.rev().collect::<PathBuf>())
    })?;

    let mut artifact_path = artifact_dir.clone();
    artifact_path.push(match c.build_profile {
        BuildProfile::Debug => "debug",
        BuildProfile::Release => "release",
    });
    artifact_path.push(&c.name);
    Ok(artifact_path)
}

/// Caches and returns the path of the artifacts built by cargo
/// This function should only be called from cargo tests
pub fn build_artifacts<'b>(
    crates: &[&'b ArtifactsBuild],
) -> anyhow::Result<HashMap<&'b ArtifactsBuild, PathBuf>> {
    static ARTIFACTS: OnceCell<Mutex<HashMap<ArtifactsBuild, PathBuf>>> = OnceCell::new();

    let mut res = HashMap::new();

    let artifacts = ARTIFACTS.get_or_init(|| Mutex::new(HashMap::new()));
    for &c in crates {
        // A panicking test may poison the lock, the cache itself is still consistent.
        let mut artifacts = artifacts.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(p) = artifacts.get(c) {
            res.insert(c, p.clone());
        } else {
            let p = inner_build_artifact(c)?;
            res.insert(c, p.clone());
            artifacts.insert(c.clone(), p);
        }
    }

    Ok(res)
}

#[macro_export]
macro_rules! timeit {
    ($op_name:literal, $op:block) => {{
        let start = std::time::Instant::now();
        let res = $op;
        let delta = start.elapsed();
        println!(
            concat!($op_name, " took {} ms"),
            delta.as_secs_f64() * 1000.0
        );
        res
    }};
}
