use splat_table::{Column, ColumnData, DataTable, ScalarType};
use splat_vfs::{BufferedStream, ReadStream};

use crate::{CodecError, compressed_ply};

const MAGIC: &[u8] = b"ply\n";
const END_HEADER: &[u8] = b"\nend_header\n";
const MAX_HEADER_BYTES: usize = 128 * 1024;

/// Rows decoded per read, for both the float fast path and the mixed path.
const ROWS_PER_CHUNK: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlyType {
    Char,
    UChar,
    Short,
    UShort,
    Int,
    UInt,
    Float,
    Double,
}

impl PlyType {
    fn parse(token: &str) -> Option<Self> {
        match token {
            "char" => Some(Self::Char),
            "uchar" => Some(Self::UChar),
            "short" => Some(Self::Short),
            "ushort" => Some(Self::UShort),
            "int" => Some(Self::Int),
            "uint" => Some(Self::UInt),
            "float" => Some(Self::Float),
            "double" => Some(Self::Double),
            _ => None,
        }
    }

    fn token(self) -> &'static str {
        match self {
            Self::Char => "char",
            Self::UChar => "uchar",
            Self::Short => "short",
            Self::UShort => "ushort",
            Self::Int => "int",
            Self::UInt => "uint",
            Self::Float => "float",
            Self::Double => "double",
        }
    }

    fn scalar_type(self) -> ScalarType {
        match self {
            Self::Char => ScalarType::I8,
            Self::UChar => ScalarType::U8,
            Self::Short => ScalarType::I16,
            Self::UShort => ScalarType::U16,
            Self::Int => ScalarType::I32,
            Self::UInt => ScalarType::U32,
            Self::Float => ScalarType::F32,
            Self::Double => ScalarType::F64,
        }
    }

    fn from_scalar_type(ty: ScalarType) -> Self {
        match ty {
            ScalarType::I8 => Self::Char,
            ScalarType::U8 => Self::UChar,
            ScalarType::I16 => Self::Short,
            ScalarType::U16 => Self::UShort,
            ScalarType::I32 => Self::Int,
            ScalarType::U32 => Self::UInt,
            ScalarType::F32 => Self::Float,
            ScalarType::F64 => Self::Double,
        }
    }

    fn size_bytes(self) -> usize {
        self.scalar_type().size_bytes()
    }
}

/// One PLY element: a name plus its own data table.
pub struct PlyElement {
    pub name: String,
    pub table: DataTable,
}

/// Parsed PLY file: comments plus elements in declaration order.
pub struct PlyData {
    pub comments: Vec<String>,
    pub elements: Vec<PlyElement>,
}

impl PlyData {
    pub fn element(&self, name: &str) -> Option<&PlyElement> {
        self.elements.iter().find(|e| e.name == name)
    }
}

struct ElementDef {
    name: String,
    count: usize,
    properties: Vec<(PlyType, String)>,
}

fn bad(detail: impl Into<String>) -> CodecError {
    CodecError::format("ply", detail)
}

/// Scans byte-wise until the end_header marker, capped at 128 KiB, and
/// checks the magic up front.
async fn read_header(stream: &mut BufferedStream) -> Result<Vec<u8>, CodecError> {
    let mut header = Vec::with_capacity(1024);
    loop {
        let Some(byte) = stream.read_byte().await? else {
            return Err(bad("Header ended before end_header"));
        };
        header.push(byte);
        // The magic line may arrive as "ply\n" or "ply\r\n".
        if header.len() == MAGIC.len() && header != MAGIC && header != b"ply\r" {
            return Err(bad("Not a ply file"));
        }
        if header.len() > MAX_HEADER_BYTES {
            return Err(bad("Header exceeds 128 KiB"));
        }
        if header.ends_with(END_HEADER) {
            return Ok(header);
        }
    }
}

fn parse_header(header: &[u8]) -> Result<(Vec<String>, Vec<ElementDef>), CodecError> {
    let text = std::str::from_utf8(header).map_err(|_| bad("Header is not valid UTF-8"))?;

    let mut comments = vec![];
    let mut elements: Vec<ElementDef> = vec![];
    let mut saw_format = false;

    for line in text.split('\n') {
        let line = line.trim_end_matches('\r');
        let mut tokens = line.split_whitespace();
        let Some(keyword) = tokens.next() else {
            continue;
        };
        match keyword {
            "ply" | "end_header" => {}
            "format" => {
                let rest: Vec<&str> = tokens.collect();
                if rest != ["binary_little_endian", "1.0"] {
                    return Err(CodecError::unsupported(
                        "ply",
                        format!("format '{}'", rest.join(" ")),
                    ));
                }
                saw_format = true;
            }
            "comment" => {
                comments.push(line.trim_start_matches("comment").trim_start().to_owned());
            }
            "element" => {
                let name = tokens.next().ok_or_else(|| bad("element without name"))?;
                let count: usize = tokens
                    .next()
                    .and_then(|c| c.parse().ok())
                    .ok_or_else(|| bad("element without count"))?;
                elements.push(ElementDef {
                    name: name.to_owned(),
                    count,
                    properties: vec![],
                });
            }
            "property" => {
                let ty = tokens.next().ok_or_else(|| bad("property without type"))?;
                if ty == "list" {
                    return Err(CodecError::unsupported("ply", "list properties"));
                }
                let ty = PlyType::parse(ty)
                    .ok_or_else(|| bad(format!("Unknown property type '{ty}'")))?;
                let name = tokens.next().ok_or_else(|| bad("property without name"))?;
                let element = elements
                    .last_mut()
                    .ok_or_else(|| bad("property before any element"))?;
                element.properties.push((ty, name.to_owned()));
            }
            other => return Err(bad(format!("Unknown header keyword '{other}'"))),
        }
    }

    if !saw_format {
        return Err(bad("Missing format line"));
    }
    Ok((comments, elements))
}

fn read_scalar(ty: PlyType, bytes: &[u8]) -> f64 {
    match ty {
        PlyType::Char => bytes[0] as i8 as f64,
        PlyType::UChar => bytes[0] as f64,
        PlyType::Short => i16::from_le_bytes([bytes[0], bytes[1]]) as f64,
        PlyType::UShort => u16::from_le_bytes([bytes[0], bytes[1]]) as f64,
        PlyType::Int => i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64,
        PlyType::UInt => u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64,
        PlyType::Float => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64,
        PlyType::Double => f64::from_le_bytes(bytes[..8].try_into().expect("8 byte slice")),
    }
}

async fn read_element(
    stream: &mut BufferedStream,
    def: &ElementDef,
) -> Result<PlyElement, CodecError> {
    if def.properties.is_empty() {
        return Err(bad(format!("Element '{}' has no properties", def.name)));
    }

    let all_float = def.properties.iter().all(|(ty, _)| *ty == PlyType::Float);
    let stride: usize = def.properties.iter().map(|(ty, _)| ty.size_bytes()).sum();
    let num_props = def.properties.len();

    let mut chunk = vec![0u8; ROWS_PER_CHUNK * stride];

    let columns = if all_float {
        // Fast path: bulk-read rows, transpose with a property-major inner
        // loop for column locality.
        let mut columns: Vec<Vec<f32>> = (0..num_props)
            .map(|_| Vec::with_capacity(def.count))
            .collect();
        let mut row = 0;
        while row < def.count {
            let rows_now = ROWS_PER_CHUNK.min(def.count - row);
            let bytes = &mut chunk[..rows_now * stride];
            stream.read_exact(bytes).await?;
            for (p, column) in columns.iter_mut().enumerate() {
                for r in 0..rows_now {
                    let at = (r * num_props + p) * 4;
                    column.push(f32::from_le_bytes(
                        bytes[at..at + 4].try_into().expect("4 byte slice"),
                    ));
                }
            }
            row += rows_now;
        }
        columns
            .into_iter()
            .zip(&def.properties)
            .map(|(data, (_, name))| Column::new(name.clone(), ColumnData::F32(data)))
            .collect()
    } else {
        // Mixed path: per-property byte offsets into each row.
        let mut offsets = Vec::with_capacity(num_props);
        let mut at = 0;
        for (ty, _) in &def.properties {
            offsets.push(at);
            at += ty.size_bytes();
        }

        let mut columns: Vec<Column> = def
            .properties
            .iter()
            .map(|(ty, name)| {
                Column::new(name.clone(), ColumnData::zeroed(ty.scalar_type(), def.count))
            })
            .collect();

        let mut row = 0;
        while row < def.count {
            let rows_now = ROWS_PER_CHUNK.min(def.count - row);
            let bytes = &mut chunk[..rows_now * stride];
            stream.read_exact(bytes).await?;
            for (p, column) in columns.iter_mut().enumerate() {
                let ty = def.properties[p].0;
                for r in 0..rows_now {
                    let value = read_scalar(ty, &bytes[r * stride + offsets[p]..]);
                    column.data.set(row + r, value);
                }
            }
            row += rows_now;
        }
        columns
    };

    Ok(PlyElement {
        name: def.name.clone(),
        table: DataTable::new(columns)?,
    })
}

/// Parses a full PLY file (header plus every element) without interpreting
/// the element semantics.
pub async fn read_ply_data(stream: ReadStream) -> Result<PlyData, CodecError> {
    let mut stream = BufferedStream::new(stream);
    let header = read_header(&mut stream).await?;
    let (comments, defs) = parse_header(&header)?;

    let mut elements = Vec::with_capacity(defs.len());
    for def in &defs {
        elements.push(read_element(&mut stream, def).await?);
    }
    Ok(PlyData { comments, elements })
}

/// Reads a PLY file into a splat table, transparently decompressing the
/// chunked quantized variant.
pub async fn read_ply(stream: ReadStream) -> Result<DataTable, CodecError> {
    let data = read_ply_data(stream).await?;
    if compressed_ply::is_compressed_ply(&data) {
        return compressed_ply::decode_compressed_ply(&data);
    }
    data.elements
        .into_iter()
        .find(|e| e.name == "vertex")
        .map(|e| e.table)
        .ok_or_else(|| bad("No vertex element"))
}

fn write_scalar(out: &mut Vec<u8>, ty: ScalarType, value: f64) {
    match ty {
        ScalarType::I8 => out.push(value as i8 as u8),
        ScalarType::U8 => out.push(value as u8),
        ScalarType::I16 => out.extend_from_slice(&(value as i16).to_le_bytes()),
        ScalarType::U16 => out.extend_from_slice(&(value as u16).to_le_bytes()),
        ScalarType::I32 => out.extend_from_slice(&(value as i32).to_le_bytes()),
        ScalarType::U32 => out.extend_from_slice(&(value as u32).to_le_bytes()),
        ScalarType::F32 => out.extend_from_slice(&(value as f32).to_le_bytes()),
        ScalarType::F64 => out.extend_from_slice(&value.to_le_bytes()),
    }
}

/// Serializes elements back to binary little-endian PLY, preserving column
/// names and element types.
pub fn write_ply_data(data: &PlyData) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::new();
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(b"format binary_little_endian 1.0\n");
    for comment in &data.comments {
        out.extend_from_slice(format!("comment {comment}\n").as_bytes());
    }
    for element in &data.elements {
        out.extend_from_slice(
            format!("element {} {}\n", element.name, element.table.num_rows()).as_bytes(),
        );
        for column in element.table.columns() {
            let ty = PlyType::from_scalar_type(column.data.scalar_type());
            out.extend_from_slice(format!("property {} {}\n", ty.token(), column.name).as_bytes());
        }
    }
    out.extend_from_slice(b"end_header\n");

    for element in &data.elements {
        let columns = element.table.columns();
        for row in 0..element.table.num_rows() {
            for column in columns {
                write_scalar(&mut out, column.data.scalar_type(), column.data.get(row));
            }
        }
    }
    Ok(out)
}

/// Writes one table as the single `vertex` element of a PLY file.
pub fn write_ply(table: &DataTable) -> Result<Vec<u8>, CodecError> {
    if table.num_rows() == 0 {
        return Err(CodecError::EmptyTable);
    }
    write_ply_data(&PlyData {
        comments: vec!["Generated by splat-transform".to_owned()],
        elements: vec![PlyElement {
            name: "vertex".to_owned(),
            table: table.clone(),
        }],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::test_grid;
    use splat_vfs::ReadSource;

    async fn stream_of(bytes: Vec<u8>) -> ReadStream {
        ReadSource::from_bytes("test.ply", bytes)
            .read(None)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn grid_roundtrips_bit_exact() {
        let table = test_grid();
        let bytes = write_ply(&table).unwrap();

        let read_once = read_ply(stream_of(bytes).await).await.unwrap();
        let bytes_again = write_ply(&read_once).unwrap();
        let read_twice = read_ply(stream_of(bytes_again).await).await.unwrap();

        assert_eq!(read_once.num_rows(), 16);
        assert_eq!(read_once, read_twice);

        // Same columns, same types, bit-equal values vs the source table.
        assert_eq!(read_once.num_columns(), table.num_columns());
        for (a, b) in read_once.columns().iter().zip(table.columns()) {
            assert_eq!(a.name, b.name);
            assert_eq!(a.data, b.data);
        }
    }

    #[tokio::test]
    async fn column_sums_survive() {
        let table = test_grid();
        let bytes = write_ply(&table).unwrap();
        let read = read_ply(stream_of(bytes).await).await.unwrap();

        for column in table.columns() {
            let sum = |t: &DataTable| -> f64 {
                let c = t.column(&column.name).unwrap();
                (0..c.data.len()).map(|i| c.data.get(i)).sum()
            };
            assert!(
                (sum(&table) - sum(&read)).abs() < 1e-5,
                "Column {} sum drifted",
                column.name
            );
        }
    }

    #[tokio::test]
    async fn mixed_types_roundtrip() {
        let table = DataTable::new(vec![
            Column::new("a", ColumnData::U8(vec![0, 127, 255])),
            Column::new("b", ColumnData::I16(vec![-5, 0, 1234])),
            Column::new("c", ColumnData::F64(vec![0.5, -1.25, 3.75])),
            Column::new("d", ColumnData::U32(vec![1, 2, u32::MAX])),
        ])
        .unwrap();
        let data = PlyData {
            comments: vec![],
            elements: vec![PlyElement {
                name: "vertex".to_owned(),
                table: table.clone(),
            }],
        };

        let bytes = write_ply_data(&data).unwrap();
        let read = read_ply_data(stream_of(bytes).await).await.unwrap();
        assert_eq!(read.elements[0].table, table);
    }

    #[tokio::test]
    async fn header_grammar() {
        let err = read_ply(stream_of(b"not a ply at all".to_vec()).await).await;
        assert!(matches!(err, Err(CodecError::Format { .. })));

        let ascii = b"ply\nformat ascii 1.0\nelement vertex 0\nproperty float x\nend_header\n";
        let err = read_ply(stream_of(ascii.to_vec()).await).await;
        assert!(matches!(err, Err(CodecError::Unsupported { .. })));
    }

    #[tokio::test]
    async fn comments_and_crlf_are_tolerated() {
        let header =
            b"ply\r\nformat binary_little_endian 1.0\r\ncomment made by hand\r\nelement vertex 1\r\nproperty float x\r\nend_header\n";
        let mut bytes = vec![];
        bytes.extend_from_slice(header);
        bytes.extend_from_slice(&1.5f32.to_le_bytes());

        let data = read_ply_data(stream_of(bytes).await).await.unwrap();
        assert_eq!(data.comments, vec!["made by hand".to_owned()]);
        assert_eq!(data.elements[0].table.column("x").unwrap().data.get(0), 1.5);
    }
}
