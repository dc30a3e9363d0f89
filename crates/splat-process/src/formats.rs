/// Closed set of readable inputs, dispatched by file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    Ply,
    SogBundle,
    SogLoose,
    Splat,
    Ksplat,
    Spz,
    Lcc,
    Generator,
}

impl InputFormat {
    pub fn from_name(name: &str) -> Option<Self> {
        let lower = name.to_lowercase();
        if lower.ends_with("meta.json") {
            Some(Self::SogLoose)
        } else if lower.ends_with(".ply") {
            Some(Self::Ply)
        } else if lower.ends_with(".sog") {
            Some(Self::SogBundle)
        } else if lower.ends_with(".splat") {
            Some(Self::Splat)
        } else if lower.ends_with(".ksplat") {
            Some(Self::Ksplat)
        } else if lower.ends_with(".spz") {
            Some(Self::Spz)
        } else if lower.ends_with(".lcc") {
            Some(Self::Lcc)
        } else if lower.ends_with(".mjs") {
            Some(Self::Generator)
        } else {
            None
        }
    }
}

/// Closed set of writable outputs, dispatched by file name suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Csv,
    Lod,
    SogBundle,
    SogLoose,
    CompressedPly,
    Ply,
    HtmlBundle,
    Html,
}

impl OutputFormat {
    pub fn from_name(name: &str, unbundled: bool) -> Option<Self> {
        let lower = name.to_lowercase();
        if lower.ends_with(".csv") {
            Some(Self::Csv)
        } else if lower.ends_with("lod-meta.json") {
            Some(Self::Lod)
        } else if lower.ends_with(".sog") {
            Some(Self::SogBundle)
        } else if lower.ends_with("meta.json") {
            Some(Self::SogLoose)
        } else if lower.ends_with(".compressed.ply") {
            Some(Self::CompressedPly)
        } else if lower.ends_with(".ply") {
            Some(Self::Ply)
        } else if lower.ends_with(".html") {
            Some(if unbundled { Self::Html } else { Self::HtmlBundle })
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_suffix_precedence() {
        assert_eq!(OutputFormat::from_name("a.csv", false), Some(OutputFormat::Csv));
        assert_eq!(
            OutputFormat::from_name("scene/lod-meta.json", false),
            Some(OutputFormat::Lod)
        );
        assert_eq!(
            OutputFormat::from_name("scene/meta.json", false),
            Some(OutputFormat::SogLoose)
        );
        assert_eq!(
            OutputFormat::from_name("a.compressed.ply", false),
            Some(OutputFormat::CompressedPly)
        );
        assert_eq!(OutputFormat::from_name("a.ply", false), Some(OutputFormat::Ply));
        assert_eq!(OutputFormat::from_name("a.sog", false), Some(OutputFormat::SogBundle));
        assert_eq!(
            OutputFormat::from_name("a.html", false),
            Some(OutputFormat::HtmlBundle)
        );
        assert_eq!(OutputFormat::from_name("a.html", true), Some(OutputFormat::Html));
        assert_eq!(OutputFormat::from_name("a.xyz", false), None);
    }

    #[test]
    fn input_dispatch() {
        assert_eq!(InputFormat::from_name("x.PLY"), Some(InputFormat::Ply));
        assert_eq!(InputFormat::from_name("x.compressed.ply"), Some(InputFormat::Ply));
        assert_eq!(InputFormat::from_name("scan/meta.json"), Some(InputFormat::SogLoose));
        assert_eq!(InputFormat::from_name("x.ksplat"), Some(InputFormat::Ksplat));
        assert_eq!(InputFormat::from_name("grid.mjs"), Some(InputFormat::Generator));
        assert_eq!(InputFormat::from_name("x.bin"), None);
    }
}
