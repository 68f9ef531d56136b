use anyhow::Result;
use once_cell::sync::Lazy;
use std::path::{Path, PathBuf};
use yolact::{config::LearningRateSchedule, Config};

static CONFIG_DIR: Lazy<PathBuf> =
    Lazy::new(|| Path::new(env!("CARGO_MANIFEST_DIR")).join("tests").join("cfg"));

#[test]
fn coco_config_matches_preset() -> Result<()> {
    let config = Config::open(CONFIG_DIR.join("coco.json5"))?;
    let preset = Config::coco();

    assert_eq!(config.anchor, preset.anchor);
    assert_eq!(config.matching, preset.matching);
    assert_eq!(config.detection, preset.detection);
    assert_eq!(config.loss, preset.loss);
    assert_eq!(config.model, preset.model);
    assert_eq!(config.evaluation, preset.evaluation);
    assert!(matches!(
        config.training.lr_schedule,
        LearningRateSchedule::Warmup { warmup_steps: 500, .. }
    ));
    Ok(())
}

#[test]
fn optional_sections_use_defaults() -> Result<()> {
    let config = Config::open(CONFIG_DIR.join("minimal.json5"))?;
    assert_eq!(config.anchor.num_anchors(), 16 + 4);
    assert_eq!(config.loss.box_variances, Config::coco().loss.box_variances);
    assert_eq!(config.evaluation, Config::coco().evaluation);
    assert_eq!(config.training.print_interval.get(), 10);
    Ok(())
}

#[test]
fn mismatched_levels_are_rejected_at_load() {
    let err = Config::open(CONFIG_DIR.join("mismatched_levels.json5")).unwrap_err();
    assert!(err.downcast_ref::<yolact::Error>().unwrap().is_config());
}

#[test]
fn missing_file_is_reported() {
    assert!(Config::open(CONFIG_DIR.join("no_such_file.json5")).is_err());
}
