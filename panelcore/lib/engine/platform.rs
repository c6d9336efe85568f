use crate::{PanelcoreError, PanelcoreResult};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// The operating system and architecture names used in release asset names.
///
/// Fails with [`PanelcoreError::UnsupportedPlatform`] for hosts without a published build.
pub fn release_platform(os: &str, arch: &str) -> PanelcoreResult<(&'static str, &'static str)> {
    let unsupported = || PanelcoreError::UnsupportedPlatform {
        os: os.to_string(),
        arch: arch.to_string(),
    };

    let release_os = match os {
        "linux" => "linux",
        "macos" => "macos",
        "windows" => "windows",
        "freebsd" => "freebsd",
        _ => return Err(unsupported()),
    };

    let release_arch = match arch {
        "x86_64" => "64",
        "x86" => "32",
        "aarch64" => "arm64-v8a",
        "arm" => "arm32-v7a",
        "s390x" => "s390x",
        "riscv64" => "riscv64",
        _ => return Err(unsupported()),
    };

    Ok((release_os, release_arch))
}

/// The release archive name for a platform, e.g. `Xray-linux-64.zip`.
pub fn release_asset_name(os: &str, arch: &str) -> PanelcoreResult<String> {
    let (os, arch) = release_platform(os, arch)?;
    Ok(format!("Xray-{}-{}.zip", os, arch))
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_asset_name() -> anyhow::Result<()> {
        assert_eq!(release_asset_name("linux", "x86_64")?, "Xray-linux-64.zip");
        assert_eq!(
            release_asset_name("linux", "aarch64")?,
            "Xray-linux-arm64-v8a.zip"
        );
        assert_eq!(
            release_asset_name("macos", "aarch64")?,
            "Xray-macos-arm64-v8a.zip"
        );
        assert_eq!(release_asset_name("linux", "arm")?, "Xray-linux-arm32-v7a.zip");
        assert_eq!(release_asset_name("windows", "x86")?, "Xray-windows-32.zip");

        Ok(())
    }

    #[test]
    fn test_release_asset_name_unsupported() {
        assert!(matches!(
            release_asset_name("linux", "powerpc64"),
            Err(PanelcoreError::UnsupportedPlatform { ref arch, .. }) if arch == "powerpc64"
        ));
        assert!(matches!(
            release_asset_name("solaris", "x86_64"),
            Err(PanelcoreError::UnsupportedPlatform { ref os, .. }) if os == "solaris"
        ));
    }
}
