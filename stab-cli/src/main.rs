// SPDX-License-Identifier: MPL-2.0

use std::path::{Path, PathBuf};

use anyhow::Context;
use image::{DynamicImage, GenericImageView};
use stab_core::estimator::Robust;
use stab_core::pyramid::{estimate_motion, PyramidConfig};
use stab_core::{ColorImage, GrayImage, TransformKind};

const DEFAULT_KIND: &str = "homography";
const DEFAULT_MIN_D: &str = "50";
const DEFAULT_MAX_D: &str = "200";

/// Entry point of the program.
fn main() -> anyhow::Result<()> {
    let args_spec = vec![
        clap::Arg::with_name("kind")
            .long("kind")
            .value_name("name")
            .default_value(DEFAULT_KIND)
            .possible_values(&["translation", "euclidean", "similarity", "affinity", "homography"])
            .help("Transform family to estimate"),
        clap::Arg::with_name("min-d")
            .long("min-d")
            .value_name("px")
            .default_value(DEFAULT_MIN_D)
            .help("Stop building coarser pyramid levels once the smaller dimension drops below this"),
        clap::Arg::with_name("max-d")
            .long("max-d")
            .value_name("px")
            .default_value(DEFAULT_MAX_D)
            .help("Skip levels finer than this before starting the pyramid"),
        clap::Arg::with_name("out")
            .long("out")
            .value_name("path")
            .help("Save the second image warped onto the first at this path"),
        clap::Arg::with_name("verbose")
            .short("v")
            .multiple(true)
            .help("Multiple levels of verbosity (up to -vvv)"),
        clap::Arg::with_name("FRAME1").required(true).help("Path to the reference frame"),
        clap::Arg::with_name("FRAME2").required(true).help("Path to the frame to align onto FRAME1"),
    ];
    let matches = clap::App::new("stab-cli")
        .version(std::env!("CARGO_PKG_VERSION"))
        .about("Estimate the motion between two frames and optionally warp one onto the other")
        .args(&args_spec)
        .get_matches();

    let verbosity = 1 + matches.occurrences_of("verbose");
    stderrlog::new()
        .quiet(false)
        .verbosity(verbosity as usize)
        .show_level(false)
        .color(stderrlog::ColorChoice::Never)
        .init()
        .context("Failed to initialize log verbosity")?;

    run(get_args(&matches)?)
}

struct Args {
    kind: TransformKind,
    min_d: usize,
    max_d: usize,
    out: Option<PathBuf>,
    frame1: PathBuf,
    frame2: PathBuf,
}

fn get_args(matches: &clap::ArgMatches) -> anyhow::Result<Args> {
    let kind = match matches.value_of("kind").unwrap() {
        "translation" => TransformKind::Translation,
        "euclidean" => TransformKind::Euclidean,
        "similarity" => TransformKind::Similarity,
        "affinity" => TransformKind::Affinity,
        "homography" => TransformKind::Homography,
        other => anyhow::bail!("Unrecognized transform kind: {}", other),
    };
    Ok(Args {
        kind,
        min_d: matches.value_of("min-d").unwrap().parse()?,
        max_d: matches.value_of("max-d").unwrap().parse()?,
        out: matches.value_of("out").map(PathBuf::from),
        frame1: PathBuf::from(matches.value_of("FRAME1").unwrap()),
        frame2: PathBuf::from(matches.value_of("FRAME2").unwrap()),
    })
}

fn run(args: Args) -> anyhow::Result<()> {
    log::info!("Loading {}", args.frame1.display());
    let img1 = load_image(&args.frame1)?;
    log::info!("Loading {}", args.frame2.display());
    let img2 = load_image(&args.frame2)?;

    if img1.dimensions() != img2.dimensions() {
        anyhow::bail!(
            "Frame dimensions differ: {:?} vs {:?}",
            img1.dimensions(),
            img2.dimensions()
        );
    }

    let gray1 = to_gray_image(&img1);
    let gray2 = to_gray_image(&img2);

    let mut config = PyramidConfig::new(args.kind, Robust::Lorentzian { lambda: 0.0 });
    config.min_d = args.min_d;
    config.max_d = args.max_d;

    let now = std::time::Instant::now();
    let p = estimate_motion(&gray1, &gray2, &config);
    log::info!("Estimation took {:.3} s", now.elapsed().as_secs_f32());

    print!("{}", p[0]);
    for v in p.iter().skip(1) {
        print!(", {}", v);
    }
    println!();

    if let Some(out_path) = args.out {
        let color2 = to_color_image(&img2);
        let correction = stab_core::transform::invert(&p, args.kind);
        let warped = warp_with(&color2, &correction, args.kind);
        log::info!("Saving warped frame to {}", out_path.display());
        save_color_image(&warped, &out_path)?;
    }
    Ok(())
}

fn load_image(path: &Path) -> anyhow::Result<DynamicImage> {
    image::open(path).context(format!("Failed to open image {}", path.display()))
}

fn to_gray_image(img: &DynamicImage) -> GrayImage {
    let luma = img.to_luma8();
    let (width, height) = luma.dimensions();
    let data = luma.into_raw().into_iter().map(|v| v as f32).collect();
    GrayImage::new(width as usize, height as usize, data)
}

fn to_color_image(img: &DynamicImage) -> ColorImage {
    let rgb = img.to_rgb8();
    let (width, height) = rgb.dimensions();
    let data = rgb.into_raw().into_iter().map(|v| v as f32).collect();
    ColorImage::new(width as usize, height as usize, 3, data)
}

fn warp_with(src: &ColorImage, correction: &stab_core::Params, kind: TransformKind) -> ColorImage {
    use stab_core::image::bicubic_sample_color;
    use stab_core::transform::project;
    let mut data = vec![0.0f32; src.width * src.height * src.nz];
    for y in 0..src.height {
        for x in 0..src.width {
            let (sx, sy) = project(x as f32, y as f32, correction, kind).unwrap_or((x as f32, y as f32));
            for k in 0..src.nz {
                data[(x + src.width * y) * src.nz + k] = bicubic_sample_color(src, sx, sy, k);
            }
        }
    }
    ColorImage::new(src.width, src.height, src.nz, data)
}

fn save_color_image(img: &ColorImage, path: &Path) -> anyhow::Result<()> {
    let mut buf = image::RgbImage::new(img.width as u32, img.height as u32);
    for y in 0..img.height {
        for x in 0..img.width {
            let r = img.get(x, y, 0).round().clamp(0.0, 255.0) as u8;
            let g = img.get(x, y, 1).round().clamp(0.0, 255.0) as u8;
            let b = img.get(x, y, 2).round().clamp(0.0, 255.0) as u8;
            buf.put_pixel(x as u32, y as u32, image::Rgb([r, g, b]));
        }
    }
    buf.save(path).context(format!("Failed to save image {}", path.display()))
}
