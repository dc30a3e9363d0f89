use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result, bail};
use clap::Parser;
use glam::Vec3;
use splat_actions::{Comparator, ProcessAction, VisibilityTarget};

/// Global options lead the command line; everything from the first
/// positional onward is the file/action list, bound by position.
#[derive(Parser, Debug)]
#[command(
    name = "splat-transform",
    about = "Convert and transform Gaussian splat scenes",
    version,
    disable_version_flag = true,
    after_help = "\
Each INPUT and the final OUTPUT may be followed by per-file actions:
  -t/--translate x,y,z     -r/--rotate x,y,z        -s/--scale f
  -N/--filter-nan          -V/--filter-value name,cmp,value
  -H/--filter-harmonics n  -B/--filter-box x,y,z,X,Y,Z ('-' or empty = unbounded)
  -S/--filter-sphere x,y,z,r                        -Y/--filter-visibility n|n%
  -M/--morton-order        -p/--params k=v,...      -l/--lod n"
)]
pub struct Cli {
    /// Overwrite existing output files.
    #[arg(short = 'w', long)]
    pub overwrite: bool,

    /// Only log errors.
    #[arg(short, long)]
    pub quiet: bool,

    /// Force CPU k-means even when a compute device is available.
    #[arg(short, long)]
    pub cpu: bool,

    /// k-means iterations for SOG spherical-harmonic palettes.
    #[arg(short, long, default_value_t = 10)]
    pub iterations: usize,

    /// Viewer settings JSON embedded into HTML output.
    #[arg(short = 'E', long, value_name = "FILE")]
    pub viewer_settings: Option<PathBuf>,

    /// Emit HTML viewer files separately instead of one bundled page.
    #[arg(short = 'U', long)]
    pub unbundled: bool,

    /// LOD levels to keep in LOD output, comma separated.
    #[arg(short = 'O', long, value_name = "n,n,...")]
    pub lod_select: Option<String>,

    /// Maximum splats per LOD chunk, in units of 1024.
    #[arg(short = 'C', long, default_value_t = 512)]
    pub lod_chunk_count: usize,

    /// LOD chunk cell extent in world units.
    #[arg(short = 'X', long, default_value_t = 16.0)]
    pub lod_chunk_extent: f64,

    /// Print version.
    #[arg(short = 'v', long = "version", action = clap::ArgAction::Version)]
    pub version: Option<bool>,

    /// INPUT [ACTIONS]... [INPUT [ACTIONS]...]... OUTPUT [ACTIONS]...
    #[arg(
        value_name = "FILES_AND_ACTIONS",
        trailing_var_arg = true,
        allow_hyphen_values = true,
        required = true
    )]
    pub files: Vec<String>,
}

/// One positional file plus the actions bound to it.
#[derive(Debug, PartialEq)]
pub struct FileSpec {
    pub name: String,
    pub actions: Vec<ProcessAction>,
}

#[derive(Debug, PartialEq)]
pub struct Pipeline {
    pub inputs: Vec<FileSpec>,
    pub output: FileSpec,
}

fn parse_vec3(value: &str, flag: &str) -> Result<Vec3> {
    let parts: Vec<&str> = value.split(',').collect();
    if parts.len() != 3 {
        bail!("{flag} expects x,y,z (got '{value}')");
    }
    let mut out = [0.0f32; 3];
    for (slot, part) in out.iter_mut().zip(&parts) {
        *slot = part
            .trim()
            .parse()
            .with_context(|| format!("{flag}: bad number '{part}'"))?;
    }
    Ok(Vec3::from_array(out))
}

/// Box bounds: empty or '-' fields are unbounded in the field's direction.
fn parse_box(value: &str) -> Result<(Vec3, Vec3)> {
    let parts: Vec<&str> = value.split(',').collect();
    if parts.len() != 6 {
        bail!("--filter-box expects x,y,z,X,Y,Z (got '{value}')");
    }
    let field = |i: usize, unbounded: f32| -> Result<f32> {
        let text = parts[i].trim();
        if text.is_empty() || text == "-" {
            return Ok(unbounded);
        }
        text.parse()
            .with_context(|| format!("--filter-box: bad number '{text}'"))
    };
    Ok((
        Vec3::new(
            field(0, f32::NEG_INFINITY)?,
            field(1, f32::NEG_INFINITY)?,
            field(2, f32::NEG_INFINITY)?,
        ),
        Vec3::new(
            field(3, f32::INFINITY)?,
            field(4, f32::INFINITY)?,
            field(5, f32::INFINITY)?,
        ),
    ))
}

fn parse_filter_value(value: &str) -> Result<ProcessAction> {
    let parts: Vec<&str> = value.split(',').collect();
    if parts.len() != 3 {
        bail!("--filter-value expects name,cmp,value (got '{value}')");
    }
    Ok(ProcessAction::FilterValue {
        column: parts[0].trim().to_owned(),
        cmp: Comparator::from_str(parts[1].trim()).map_err(|e| anyhow::anyhow!(e))?,
        value: parts[2]
            .trim()
            .parse()
            .with_context(|| format!("--filter-value: bad number '{}'", parts[2]))?,
    })
}

fn parse_visibility(value: &str) -> Result<ProcessAction> {
    let text = value.trim();
    let target = if let Some(percent) = text.strip_suffix('%') {
        VisibilityTarget::Percent(
            percent
                .parse()
                .with_context(|| format!("--filter-visibility: bad percent '{text}'"))?,
        )
    } else {
        VisibilityTarget::Count(
            text.parse()
                .with_context(|| format!("--filter-visibility: bad count '{text}'"))?,
        )
    };
    Ok(ProcessAction::FilterVisibility(target))
}

fn parse_params(value: &str) -> Result<Vec<ProcessAction>> {
    value
        .split(',')
        .filter(|pair| !pair.trim().is_empty())
        .map(|pair| {
            let (name, val) = pair
                .split_once('=')
                .with_context(|| format!("--params: expected k=v (got '{pair}')"))?;
            Ok(ProcessAction::Param {
                name: name.trim().to_owned(),
                value: val.trim().to_owned(),
            })
        })
        .collect()
}

struct ActionFlag {
    short: &'static str,
    long: &'static str,
    takes_value: bool,
}

#[rustfmt::skip]

const ACTION_FLAGS: [ActionFlag; 12] = [
    ActionFlag { short: "-t", long: "--translate", takes_value: true },
    ActionFlag { short: "-r", long: "--rotate", takes_value: true },
    ActionFlag { short: "-s", long: "--scale", takes_value: true },
    ActionFlag { short: "-N", long: "--filter-nan", takes_value: false },
    ActionFlag { short: "-V", long: "--filter-value", takes_value: true },
    ActionFlag { short: "-H", long: "--filter-harmonics", takes_value: true },
    ActionFlag { short: "-B", long: "--filter-box", takes_value: true },
    ActionFlag { short: "-S", long: "--filter-sphere", takes_value: true },
    ActionFlag { short: "-Y", long: "--filter-visibility", takes_value: true },
    ActionFlag { short: "-M", long: "--morton-order", takes_value: false },
    ActionFlag { short: "-p", long: "--params", takes_value: true },
    ActionFlag { short: "-l", long: "--lod", takes_value: true },
];

/// Splits the trailing token list into positionals and the actions bound to
/// the immediately preceding positional.
pub fn parse_pipeline(tokens: &[String]) -> Result<Pipeline> {
    let mut specs: Vec<FileSpec> = vec![];
    let mut i = 0;

    while i < tokens.len() {
        let token = &tokens[i];
        i += 1;

        if !token.starts_with('-') || token == "-" {
            specs.push(FileSpec {
                name: token.clone(),
                actions: vec![],
            });
            continue;
        }

        // "--flag=value" and "--flag value" both work.
        let (name, inline_value) = match token.split_once('=') {
            Some((name, value)) => (name, Some(value.to_owned())),
            None => (token.as_str(), None),
        };
        let flag = ACTION_FLAGS
            .iter()
            .find(|f| f.short == name || f.long == name)
            .with_context(|| format!("Unknown action '{token}'"))?;

        let value = if !flag.takes_value {
            if inline_value.is_some() {
                bail!("{} takes no value", flag.long);
            }
            None
        } else if let Some(value) = inline_value {
            Some(value)
        } else {
            let value = tokens
                .get(i)
                .with_context(|| format!("{} needs a value", flag.long))?;
            i += 1;
            Some(value.clone())
        };

        let target = specs
            .last_mut()
            .with_context(|| format!("Action '{token}' must follow an input or output file"))?;

        let actions: Vec<ProcessAction> = match flag.long {
            "--translate" => vec![ProcessAction::Translate(parse_vec3(
                value.as_deref().expect("Value enforced"),
                "--translate",
            )?)],
            "--rotate" => vec![ProcessAction::Rotate(parse_vec3(
                value.as_deref().expect("Value enforced"),
                "--rotate",
            )?)],
            "--scale" => vec![ProcessAction::Scale(
                value
                    .as_deref()
                    .expect("Value enforced")
                    .trim()
                    .parse()
                    .context("--scale: bad number")?,
            )],
            "--filter-nan" => vec![ProcessAction::FilterNan],
            "--filter-value" => vec![parse_filter_value(value.as_deref().expect("Value enforced"))?],
            "--filter-harmonics" => {
                let bands: u32 = value
                    .as_deref()
                    .expect("Value enforced")
                    .trim()
                    .parse()
                    .context("--filter-harmonics: bad band count")?;
                if bands > 3 {
                    bail!("--filter-harmonics expects 0..=3");
                }
                vec![ProcessAction::FilterBands(bands)]
            }
            "--filter-box" => {
                let (min, max) = parse_box(value.as_deref().expect("Value enforced"))?;
                vec![ProcessAction::FilterBox { min, max }]
            }
            "--filter-sphere" => {
                let parts = value.as_deref().expect("Value enforced");
                let fields: Vec<&str> = parts.split(',').collect();
                if fields.len() != 4 {
                    bail!("--filter-sphere expects x,y,z,r (got '{parts}')");
                }
                let center = parse_vec3(&fields[..3].join(","), "--filter-sphere")?;
                let radius: f32 = fields[3]
                    .trim()
                    .parse()
                    .context("--filter-sphere: bad radius")?;
                vec![ProcessAction::FilterSphere { center, radius }]
            }
            "--filter-visibility" => vec![parse_visibility(value.as_deref().expect("Value enforced"))?],
            "--morton-order" => vec![ProcessAction::MortonOrder],
            "--params" => parse_params(value.as_deref().expect("Value enforced"))?,
            "--lod" => vec![ProcessAction::Lod(
                value
                    .as_deref()
                    .expect("Value enforced")
                    .trim()
                    .parse()
                    .context("--lod: bad level")?,
            )],
            _ => unreachable!("Every flag is handled"),
        };
        target.actions.extend(actions);
    }

    if specs.len() < 2 {
        bail!("Expected at least one INPUT and one OUTPUT file");
    }
    let output = specs.pop().expect("Checked length");
    Ok(Pipeline {
        inputs: specs,
        output,
    })
}

/// Comma-separated LOD level list for -O/--lod-select.
pub fn parse_lod_select(value: &str) -> Result<Vec<i32>> {
    value
        .split(',')
        .filter(|part| !part.trim().is_empty())
        .map(|part| {
            part.trim()
                .parse()
                .with_context(|| format!("--lod-select: bad level '{part}'"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn actions_bind_to_preceding_file() {
        let pipeline = parse_pipeline(&tokens(&[
            "in.ply", "-s", "2", "-t", "1,2,3", "other.splat", "-N", "out.sog", "-l", "1",
        ]))
        .unwrap();

        assert_eq!(pipeline.inputs.len(), 2);
        assert_eq!(pipeline.inputs[0].name, "in.ply");
        assert_eq!(
            pipeline.inputs[0].actions,
            vec![
                ProcessAction::Scale(2.0),
                ProcessAction::Translate(Vec3::new(1.0, 2.0, 3.0)),
            ]
        );
        assert_eq!(pipeline.inputs[1].actions, vec![ProcessAction::FilterNan]);
        assert_eq!(pipeline.output.name, "out.sog");
        assert_eq!(pipeline.output.actions, vec![ProcessAction::Lod(1)]);
    }

    #[test]
    fn equals_syntax_works() {
        let pipeline =
            parse_pipeline(&tokens(&["in.ply", "--scale=0.5", "out.ply"])).unwrap();
        assert_eq!(pipeline.inputs[0].actions, vec![ProcessAction::Scale(0.5)]);
    }

    #[test]
    fn box_fields_default_to_infinity() {
        let pipeline = parse_pipeline(&tokens(&[
            "in.ply",
            "--filter-box",
            "0,-,,,,",
            "out.ply",
        ]))
        .unwrap();
        let ProcessAction::FilterBox { min, max } = &pipeline.inputs[0].actions[0] else {
            panic!("Expected a box filter");
        };
        assert_eq!(min.x, 0.0);
        assert_eq!(min.y, f32::NEG_INFINITY);
        assert_eq!(min.z, f32::NEG_INFINITY);
        assert!(max.x.is_infinite() && max.y.is_infinite() && max.z.is_infinite());
    }

    #[test]
    fn params_expand_to_param_actions() {
        let pipeline = parse_pipeline(&tokens(&[
            "grid.mjs",
            "-p",
            "size=8,spacing=0.5",
            "out.ply",
        ]))
        .unwrap();
        assert_eq!(
            pipeline.inputs[0].actions,
            vec![
                ProcessAction::Param {
                    name: "size".to_owned(),
                    value: "8".to_owned()
                },
                ProcessAction::Param {
                    name: "spacing".to_owned(),
                    value: "0.5".to_owned()
                },
            ]
        );
    }

    #[test]
    fn filter_value_and_visibility() {
        let pipeline = parse_pipeline(&tokens(&[
            "in.ply",
            "-V",
            "opacity,gte,0.5",
            "-Y",
            "25%",
            "out.ply",
        ]))
        .unwrap();
        assert_eq!(
            pipeline.inputs[0].actions[0],
            ProcessAction::FilterValue {
                column: "opacity".to_owned(),
                cmp: Comparator::Gte,
                value: 0.5
            }
        );
        assert_eq!(
            pipeline.inputs[0].actions[1],
            ProcessAction::FilterVisibility(VisibilityTarget::Percent(25.0))
        );
    }

    #[test]
    fn leading_action_is_rejected() {
        assert!(parse_pipeline(&tokens(&["-s", "2", "in.ply", "out.ply"])).is_err());
    }

    #[test]
    fn single_file_is_rejected() {
        assert!(parse_pipeline(&tokens(&["only.ply"])).is_err());
    }

    #[test]
    fn unknown_flags_are_rejected() {
        assert!(parse_pipeline(&tokens(&["in.ply", "--frobnicate", "out.ply"])).is_err());
    }

    #[test]
    fn lod_select_parses() {
        assert_eq!(parse_lod_select("0,1,2").unwrap(), vec![0, 1, 2]);
        assert!(parse_lod_select("0,x").is_err());
    }
}
