use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};

use lumi_locator::driver::image_matcher::{MatchConfig, TemplateMatcher};
use lumi_locator::driver::ocr::TesseractOcr;
use lumi_locator::driver::{android, ui_tree};
use lumi_locator::runner::capture::{self, OcrOptions};
use lumi_locator::{driver, NormPoint, Rect, Resolution, Selector, Session, Settings, Target, Template};

#[derive(Parser)]
#[command(name = "lumi-locator")]
#[command(author = "NL Team")]
#[command(version = "0.1.0")]
#[command(about = "Locate UI elements by image, hierarchy or OCR and act on them", long_about = None)]
struct Cli {
    /// Settings file (YAML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List connected devices
    Devices {
        /// Target platform
        #[arg(short, long, default_value = "android")]
        platform: String,
    },

    /// Match a template against a screenshot file
    Match {
        /// Template image
        template: PathBuf,

        /// Screenshot to search
        screen: PathBuf,

        /// Report every match instead of the best one
        #[arg(long, default_value = "false")]
        all: bool,

        /// Override the confidence threshold
        #[arg(short, long)]
        threshold: Option<f32>,

        /// Match in grayscale
        #[arg(long, default_value = "false")]
        gray: bool,
    },

    /// Resolve a selector against a saved uiautomator dump
    Query {
        /// Hierarchy XML file
        dump: PathBuf,

        /// Screen size as WIDTHxHEIGHT
        #[arg(short, long, default_value = "1080x1920")]
        screen: String,

        /// Selector keywords as key=value (text=Login, nameMatches=.*btn, index=1)
        #[arg(required = true)]
        selector: Vec<String>,
    },

    /// Crop an image file and read the text in it
    Ocr {
        /// Image file
        image: PathBuf,

        /// Crop rectangle as X_MIN,Y_MIN,X_MAX,Y_MAX
        #[arg(short, long)]
        rect: Option<String>,
    },

    /// Tap a target on a live Android device
    Tap {
        /// Device serial
        #[arg(short, long)]
        device: Option<String>,

        /// Template image to tap
        #[arg(long, conflicts_with_all = ["position", "selector"])]
        image: Option<PathBuf>,

        /// Screen percentages as X,Y
        #[arg(long, conflicts_with = "selector")]
        position: Option<String>,

        /// Selector keywords as key=value
        #[arg(required_unless_present_any = ["image", "position"])]
        selector: Vec<String>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("{} {:#}", "✗".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let settings = load_settings(cli.config.as_deref())?;

    match cli.command {
        Commands::Devices { platform } => {
            driver::list_devices(&platform).await?;
        }

        Commands::Match {
            template,
            screen,
            all,
            threshold,
            gray,
        } => {
            let frame = image::open(&screen)?.to_rgb8();
            let mut template = Template::new(template);
            if gray {
                template = template.grayscale();
            }
            let threshold = threshold.unwrap_or(settings.threshold);
            let matcher = TemplateMatcher::new(MatchConfig {
                coarse_width: settings.coarse_width as f32,
                ..MatchConfig::default()
            });

            let results = if all {
                matcher.find_all(&template, &frame, threshold)?
            } else {
                matcher.find(&template, &frame, threshold)?.into_iter().collect()
            };
            if results.is_empty() {
                println!("{} {} not found (threshold {})", "✗".red(), template, threshold);
            }
            for m in results {
                println!(
                    "{} {} at {} confidence {:.3} rect [{}, {}, {}, {}]",
                    "✓".green(),
                    template.name().cyan(),
                    m.point,
                    m.confidence,
                    m.rect.x_min,
                    m.rect.y_min,
                    m.rect.x_max,
                    m.rect.y_max
                );
            }
        }

        Commands::Query {
            dump,
            screen,
            selector,
        } => {
            let xml = std::fs::read_to_string(&dump)?;
            let screen = parse_resolution(&screen)?;
            let snapshot = android::uiautomator::parse_hierarchy(&xml, screen)?;
            let selector = parse_selector(&selector)?;
            println!(
                "{} {} nodes in {}",
                "ℹ".blue(),
                snapshot.len(),
                dump.display()
            );

            if selector.get_index().is_some() {
                match ui_tree::resolve(&selector, &snapshot)? {
                    Some(node) => println!("{} {}", "✓".green(), node),
                    None => println!("{} {} not found", "✗".red(), selector),
                }
            } else {
                let nodes = ui_tree::resolve_all(&selector, &snapshot);
                if nodes.is_empty() {
                    println!("{} {} not found", "✗".red(), selector);
                }
                for (i, node) in nodes.iter().enumerate() {
                    println!("  [{}] {}", i.to_string().yellow(), node);
                }
            }
        }

        Commands::Ocr { image, rect } => {
            let frame = image::open(&image)?.to_rgb8();
            let frame = match rect {
                Some(rect) => capture::crop(&frame, parse_rect(&rect)?)?,
                None => frame,
            };
            let ocr = TesseractOcr::new()?;
            let options = OcrOptions {
                languages: &settings.ocr_languages,
                engine_config: &settings.ocr_config,
                cutoff: settings.ocr_cutoff,
            };
            let text = capture::recognize_text(&ocr, &frame, &options)?;
            println!("{}", text);
        }

        Commands::Tap {
            device,
            image,
            position,
            selector,
        } => {
            let target: Target = match (image, position) {
                (Some(path), _) => Template::new(path).into(),
                (None, Some(pos)) => {
                    let (x, y) = parse_pair(&pos)?;
                    NormPoint::new(x, y)?.into()
                }
                (None, None) => parse_selector(&selector)?.into(),
            };
            let mut session = Session::connect_android(device.as_deref(), settings).await?;
            let tapped = session.tap(target.clone()).await;
            let results = session.finish().await?;
            let at = tapped?;
            println!(
                "{} Tapped {} at {} ({} step(s), session {})",
                "✓".green().bold(),
                target.to_string().cyan(),
                at,
                results.summary.total,
                results.session_id
            );
        }
    }

    Ok(())
}

fn load_settings(path: Option<&Path>) -> anyhow::Result<Settings> {
    Ok(match path {
        Some(path) => Settings::load(path)?,
        None => Settings::default().with_env_overrides(),
    })
}

fn parse_selector(pairs: &[String]) -> anyhow::Result<Selector> {
    let pairs = pairs
        .iter()
        .map(|pair| {
            pair.split_once('=')
                .ok_or_else(|| anyhow::anyhow!("selector keyword '{}' is not key=value", pair))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(Selector::from_pairs(pairs)?)
}

fn parse_resolution(s: &str) -> anyhow::Result<Resolution> {
    let (w, h) = s
        .split_once('x')
        .ok_or_else(|| anyhow::anyhow!("screen size '{}' is not WIDTHxHEIGHT", s))?;
    Ok(Resolution::new(w.trim().parse()?, h.trim().parse()?))
}

fn parse_pair(s: &str) -> anyhow::Result<(f64, f64)> {
    let (x, y) = s
        .split_once(',')
        .ok_or_else(|| anyhow::anyhow!("position '{}' is not X,Y", s))?;
    Ok((x.trim().parse()?, y.trim().parse()?))
}

fn parse_rect(s: &str) -> anyhow::Result<Rect> {
    let parts = s
        .split(',')
        .map(|p| p.trim().parse::<u32>())
        .collect::<Result<Vec<_>, _>>()?;
    match parts.as_slice() {
        [x_min, y_min, x_max, y_max] => Ok(Rect::new(*x_min, *y_min, *x_max, *y_max)),
        _ => anyhow::bail!("rect '{}' is not X_MIN,Y_MIN,X_MAX,Y_MAX", s),
    }
}
