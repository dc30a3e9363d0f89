/// Minimal STORE-only zip writer.
///
/// Sizes and CRCs go into a data descriptor after each entry (general
/// purpose bit 3), which every mainstream extractor accepts. Timestamps are
/// fixed so identical inputs produce byte-identical archives.
pub struct ZipStoreWriter {
    buf: Vec<u8>,
    entries: Vec<Entry>,
}

struct Entry {
    name: String,
    crc: u32,
    size: u32,
    offset: u32,
}

const LOCAL_SIG: u32 = 0x0403_4b50;
const DESCRIPTOR_SIG: u32 = 0x0807_4b50;
const CDR_SIG: u32 = 0x0201_4b50;
const EOCD_SIG: u32 = 0x0605_4b50;

const FLAG_DATA_DESCRIPTOR: u16 = 1 << 3;
const VERSION_NEEDED: u16 = 20;

impl ZipStoreWriter {
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            entries: Vec::new(),
        }
    }

    pub fn add_file(&mut self, name: &str, bytes: &[u8]) {
        let offset = self.buf.len() as u32;
        let crc = crc32fast::hash(bytes);
        let size = bytes.len() as u32;

        // Local header; sizes deferred to the data descriptor.
        self.put_u32(LOCAL_SIG);
        self.put_u16(VERSION_NEEDED);
        self.put_u16(FLAG_DATA_DESCRIPTOR);
        self.put_u16(0); // store
        self.put_u16(0); // mod time
        self.put_u16(0); // mod date
        self.put_u32(0); // crc (in descriptor)
        self.put_u32(0); // compressed size (in descriptor)
        self.put_u32(0); // uncompressed size (in descriptor)
        self.put_u16(name.len() as u16);
        self.put_u16(0); // extra length
        self.buf.extend_from_slice(name.as_bytes());

        self.buf.extend_from_slice(bytes);

        self.put_u32(DESCRIPTOR_SIG);
        self.put_u32(crc);
        self.put_u32(size);
        self.put_u32(size);

        self.entries.push(Entry {
            name: name.to_owned(),
            crc,
            size,
            offset,
        });
    }

    pub fn finish(mut self) -> Vec<u8> {
        let directory_offset = self.buf.len() as u32;
        let entries = std::mem::take(&mut self.entries);
        for entry in &entries {
            self.put_u32(CDR_SIG);
            self.put_u16(VERSION_NEEDED); // version made by
            self.put_u16(VERSION_NEEDED);
            self.put_u16(FLAG_DATA_DESCRIPTOR);
            self.put_u16(0); // store
            self.put_u16(0); // mod time
            self.put_u16(0); // mod date
            self.put_u32(entry.crc);
            self.put_u32(entry.size);
            self.put_u32(entry.size);
            self.put_u16(entry.name.len() as u16);
            self.put_u16(0); // extra length
            self.put_u16(0); // comment length
            self.put_u16(0); // disk number
            self.put_u16(0); // internal attrs
            self.put_u32(0); // external attrs
            self.put_u32(entry.offset);
            self.buf.extend_from_slice(entry.name.as_bytes());
        }
        let directory_size = self.buf.len() as u32 - directory_offset;

        self.put_u32(EOCD_SIG);
        self.put_u16(0); // disk number
        self.put_u16(0); // directory disk
        self.put_u16(entries.len() as u16);
        self.put_u16(entries.len() as u16);
        self.put_u32(directory_size);
        self.put_u32(directory_offset);
        self.put_u16(0); // comment length

        self.buf
    }

    fn put_u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    fn put_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }
}
