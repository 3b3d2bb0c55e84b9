//! Precedence: flag > environment > config file > default.

use cardsafe::config::AppConfig;
use cardsafe::core::FsType;
use figment::Jail;
use serde::Serialize;

#[derive(Serialize, Default)]
struct Flags {
    #[serde(skip_serializing_if = "Option::is_none")]
    label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dest: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    dry_run: bool,
}

#[test]
fn defaults_without_any_overrides() {
    Jail::expect_with(|jail| {
        jail.set_env("CARDSAFE_CONFIG", "missing.toml");
        let config = AppConfig::new(None::<&Flags>).expect("config");
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.run_config().unwrap().fs_type, FsType::ExFat);
        Ok(())
    });
}

#[test]
fn environment_overrides_file() {
    Jail::expect_with(|jail| {
        jail.create_file(
            "cardsafe.toml",
            r#"
                label = "FROMFILE"
                fs_type = "FAT32"
                dest = "nas:dashcam"
            "#,
        )?;
        jail.set_env("CARDSAFE_CONFIG", "cardsafe.toml");
        jail.set_env("CARDSAFE_LABEL", "FROMENV");

        let config = AppConfig::new(None::<&Flags>).expect("config");
        assert_eq!(config.label, "FROMENV");
        assert_eq!(config.dest, "nas:dashcam");
        assert_eq!(config.run_config().unwrap().fs_type, FsType::Fat32);
        Ok(())
    });
}

#[test]
fn flags_override_environment() {
    Jail::expect_with(|jail| {
        jail.set_env("CARDSAFE_CONFIG", "missing.toml");
        jail.set_env("CARDSAFE_LABEL", "FROMENV");
        jail.set_env("CARDSAFE_DEST", "envremote:cards");

        let flags = Flags {
            label: Some("FROMFLAG".into()),
            ..Default::default()
        };
        let config = AppConfig::new(Some(&flags)).expect("config");
        assert_eq!(config.label, "FROMFLAG");
        assert_eq!(config.dest, "envremote:cards");
        Ok(())
    });
}

#[test]
fn unset_boolean_flag_does_not_mask_environment() {
    Jail::expect_with(|jail| {
        jail.set_env("CARDSAFE_CONFIG", "missing.toml");
        jail.set_env("CARDSAFE_DRY_RUN", "true");

        let config = AppConfig::new(Some(&Flags::default())).expect("config");
        assert!(config.dry_run);

        let flags = Flags {
            dry_run: true,
            ..Default::default()
        };
        jail.set_env("CARDSAFE_DRY_RUN", "false");
        let config = AppConfig::new(Some(&flags)).expect("config");
        assert!(config.dry_run);
        Ok(())
    });
}

#[test]
fn numeric_looking_environment_values_stay_strings() {
    Jail::expect_with(|jail| {
        jail.set_env("CARDSAFE_CONFIG", "missing.toml");
        jail.set_env("CARDSAFE_LABEL", "2024");
        jail.set_env("CARDSAFE_DEST", "12345");
        jail.set_env("CARDSAFE_MARKER_DIR", "007");

        let config = AppConfig::new(None::<&Flags>).expect("config");
        assert_eq!(config.label, "2024");
        assert_eq!(config.dest, "12345");
        assert_eq!(config.marker_dir, "007");
        assert_eq!(config.run_config().unwrap().label, "2024");

        let flags = Flags {
            label: Some("FROMFLAG".into()),
            ..Default::default()
        };
        let config = AppConfig::new(Some(&flags)).expect("config");
        assert_eq!(config.label, "FROMFLAG");
        Ok(())
    });
}

#[test]
fn bad_filesystem_from_environment_is_rejected_at_validation() {
    Jail::expect_with(|jail| {
        jail.set_env("CARDSAFE_CONFIG", "missing.toml");
        jail.set_env("CARDSAFE_FS_TYPE", "ntfs");

        let config = AppConfig::new(None::<&Flags>).expect("config");
        assert!(config.run_config().is_err());
        Ok(())
    });
}
