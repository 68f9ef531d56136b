use anyhow::{Context, Result};
use bbox::prelude::*;
use clap::Parser;
use log::info;
use prettytable::{cell, row, Table};
use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};
use yolact::{
    evaluation::{evaluate, Modality},
    inference::Detection,
    label::LabelMap,
    AnchorGenerator, Config, ImageGroundTruth,
};

#[derive(Debug, Clone, Parser)]
enum Opts {
    /// Print the configuration summary.
    Info {
        /// configuration file
        config_file: PathBuf,
    },
    /// Print the anchor layout of each pyramid level.
    Anchors {
        /// configuration file
        config_file: PathBuf,
    },
    /// Load and validate a configuration file.
    CheckConfig {
        /// configuration file
        config_file: PathBuf,
    },
    /// Score dumped detections against ground truth.
    Evaluate {
        /// configuration file
        config_file: PathBuf,
        /// JSON file of [detections, ground truth] pairs, one per image
        dump_file: PathBuf,
    },
}

fn main() -> Result<()> {
    pretty_env_logger::init();

    match Opts::parse() {
        Opts::Info { config_file } => {
            print_info(config_file)?;
        }
        Opts::Anchors { config_file } => {
            print_anchors(config_file)?;
        }
        Opts::CheckConfig { config_file } => {
            Config::open(&config_file)?;
            println!("{} is valid", config_file.display());
        }
        Opts::Evaluate {
            config_file,
            dump_file,
        } => {
            print_evaluation(config_file, dump_file)?;
        }
    }

    Ok(())
}

fn print_info(config_file: impl AsRef<Path>) -> Result<()> {
    let config = Config::open(config_file)?;
    let num_anchors = AnchorGenerator::new(&config.anchor)?.num_anchors();

    {
        let mut table = Table::new();
        table.add_row(row!["key", "value"]);
        table.add_row(row!["image size", config.anchor.image_size]);
        table.add_row(row!["pyramid levels", config.anchor.feature_map_sizes.len()]);
        table.add_row(row!["anchors", num_anchors]);
        table.add_row(row!["classes", config.detection.num_classes]);
        table.add_row(row!["background label", config.detection.label_background]);
        table.add_row(row!["prototypes", config.model.num_mask]);
        table.add_row(row!["prototype size", config.model.proto_output_size]);
        table.add_row(row![
            "matching thresholds",
            format!(
                "pos {} / neg {} / crowd {}",
                config.matching.threshold_pos,
                config.matching.threshold_neg,
                config.matching.threshold_crowd
            )
        ]);
        table.add_row(row![
            "loss weights",
            format!(
                "cls {} / box {} / mask {} / seg {}",
                config.loss.weight_cls,
                config.loss.weight_box,
                config.loss.weight_mask,
                config.loss.weight_seg
            )
        ]);
        table.printstd();
    }

    if let Some(label_map) = coco_labels(&config) {
        let mut table = Table::new();
        table.add_row(row!["class", "category id", "name"]);
        (1..=label_map.num_classes()).for_each(|class| {
            table.add_row(row![
                class,
                label_map
                    .to_sparse(class)
                    .map(|id| id.to_string())
                    .unwrap_or_default(),
                label_map.class_name(class).unwrap_or_default(),
            ]);
        });
        table.printstd();
    }

    Ok(())
}

fn print_anchors(config_file: impl AsRef<Path>) -> Result<()> {
    let config = Config::open(config_file)?;
    let anchors = AnchorGenerator::new(&config.anchor)?.generate();

    let mut table = Table::new();
    table.add_row(row!["level", "feature size", "scale", "anchors", "index range", "sizes (h x w)"]);

    anchors
        .level_ranges()
        .iter()
        .enumerate()
        .for_each(|(level, range)| {
            let sizes: Vec<_> = anchors.as_slice()[range.clone()]
                .iter()
                .take(config.anchor.aspect_ratios.len())
                .map(|anchor| {
                    let cycxhw = anchor.cycxhw();
                    format!("{:.4} x {:.4}", cycxhw.h(), cycxhw.w())
                })
                .collect();

            table.add_row(row![
                level,
                config.anchor.feature_map_sizes[level],
                config.anchor.scales[level],
                range.len(),
                format!("{:?}", range),
                sizes.join(", "),
            ]);
        });

    table.printstd();
    println!("total anchors: {}", anchors.len());
    Ok(())
}

fn print_evaluation(config_file: impl AsRef<Path>, dump_file: impl AsRef<Path>) -> Result<()> {
    let config = Config::open(config_file)?;
    let dump_file = dump_file.as_ref();
    let records: Vec<(Vec<Detection>, ImageGroundTruth)> = {
        let reader = BufReader::new(
            File::open(dump_file)
                .with_context(|| format!("unable to open '{}'", dump_file.display()))?,
        );
        serde_json::from_reader(reader)
            .with_context(|| format!("unable to parse '{}'", dump_file.display()))?
    };
    info!("loaded {} images from '{}'", records.len(), dump_file.display());

    let num_images = records.len();
    let report = evaluate(
        &config,
        |detections: &Vec<Detection>| Ok(detections.clone()),
        records,
        num_images,
    )?;
    let labels = coco_labels(&config);

    let mut table = Table::new();
    table.add_row(row!["class", "name", "box AP", "mask AP"]);
    report.boxes.class_ap.keys().for_each(|&class| {
        let ap = |modality| {
            report
                .modality(modality)
                .class_ap
                .get(&class)
                .map(|ap| format!("{:.4}", ap))
                .unwrap_or_default()
        };
        let name = labels
            .and_then(|labels| labels.class_name(class))
            .unwrap_or_default();
        table.add_row(row![class, name, ap(Modality::Box), ap(Modality::Mask)]);
    });
    table.add_row(row![
        "all",
        "",
        format!("{:.4}", report.boxes.map),
        format!("{:.4}", report.masks.map)
    ]);
    table.printstd();

    Ok(())
}

/// The COCO label map when the configuration uses the COCO classes.
fn coco_labels(config: &Config) -> Option<&'static LabelMap> {
    let label_map = LabelMap::coco();
    (config.num_foreground_classes() == label_map.num_classes()).then(|| label_map)
}
