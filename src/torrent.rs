// Metainfo files (.torrent files) are bencoded dictionaries with the
// following keys:
//
// announce
//     The URL of the tracker.
// info
//     This maps to a dictionary, with keys described below.
//
// All strings in a .torrent file that contain text must be UTF-8 encoded.
// info dictionary
//
// The name key maps to a UTF-8 encoded string which is the suggested name to
// save the file (or directory) as. It is purely advisory.
//
// piece length maps to the number of bytes in each piece the file is split
// into. For the purposes of transfer, files are split into fixed-size pieces
// which are all the same length except for possibly the last one which may
// be truncated.
//
// pieces maps to a string whose length is a multiple of 20. It is to be
// subdivided into strings of length 20, each of which is the SHA1 hash of
// the piece at the corresponding index.
//
// There is also a key length or a key files, but not both or neither. If
// length is present then the download represents a single file, otherwise
// it represents a set of files which go in a directory structure.

use std::path::Path;

use bencode::{Bencode, BencodeDictValues};
use sha1_smol::{Digest, Sha1};

#[derive(Debug)]
pub struct Torrent {
    pub announce: Option<String>,
    pub info: Info,
}

#[derive(Debug)]
pub struct Info {
    pub file_type: FileType,
    pub name: String,
    pub piece_length: usize,
    pub pieces: Vec<[u8; 20]>,
}

#[derive(Debug)]
pub enum FileType {
    MultiFile { files: Vec<File> },
    SingleFile { length: usize },
}

#[derive(Debug)]
pub struct File {
    pub length: usize,
    pub path: Vec<String>,
}

#[derive(thiserror::Error, Debug)]
pub enum TorrentError {
    #[error("invalid torrent file: {0}")]
    InvalidTorrentFile(String),
    #[error("failed to decode bencoded data: {0}")]
    Bencode(#[from] Box<dyn std::error::Error>),
    #[error("failed to read torrent file: {0}")]
    Io(#[from] std::io::Error),
}

impl TryFrom<Bencode> for Torrent {
    type Error = TorrentError;

    fn try_from(value: Bencode) -> Result<Self, Self::Error> {
        match value {
            Bencode::Dict(torrent_table) => {
                let announce = torrent_table.get("announce").and_then(|val| match val {
                    BencodeDictValues::Bencode(Bencode::String(s)) => Some(s.clone()),
                    _ => None,
                });

                let info = match torrent_table.get("info") {
                    Some(BencodeDictValues::Bencode(info_table)) => Info::parse_info(info_table),
                    _ => Err(TorrentError::InvalidTorrentFile(
                        "info dictionary does not exist".to_string(),
                    )),
                }?;

                Ok(Self { announce, info })
            }
            _ => Err(TorrentError::InvalidTorrentFile(
                "torrent metainfo file should have a bencoded dictionary".to_string(),
            )),
        }
    }
}

impl Torrent {
    pub fn from_file(file_path: &Path) -> Result<Self, TorrentError> {
        let buffer = std::fs::read(file_path)?;
        Self::from_bytes(&buffer)
    }

    pub fn from_bytes(encoded_bytes: &[u8]) -> Result<Self, TorrentError> {
        let (values, _) = Bencode::from_bytes(encoded_bytes, |s| match s {
            "pieces" => Some(20),
            _ => None,
        })?;
        Torrent::try_from(values)
    }

    /// The total length of the downloadable content: `L` in spec terms.
    pub fn total_length(&self) -> usize {
        self.info.get_file_length()
    }

    /// `N`, the number of pieces.
    pub fn piece_count(&self) -> usize {
        self.info.pieces.len()
    }

    /// `P`, the nominal piece length.
    pub fn piece_length(&self) -> usize {
        self.info.piece_length
    }

    pub fn piece_hashes(&self) -> &[[u8; 20]] {
        &self.info.pieces
    }

    /// `I`, the 20-byte SHA-1 of the bencoded `info` dictionary.
    pub fn info_hash(&self) -> [u8; 20] {
        self.info.get_hash().bytes()
    }
}

impl Info {
    pub fn to_bytes(&self) -> Vec<u8> {
        let file_type_bytes = self.file_type.to_bytes();
        let name_bytes = format!("{}:{}", self.name.len(), self.name).into_bytes();
        let piece_length_bytes = format!("i{}e", self.piece_length).into_bytes();

        let mut res: Vec<u8> = Vec::new();
        res.push(b'd');
        res.extend(file_type_bytes);

        res.extend(b"4:name");
        res.extend(name_bytes);
        res.extend(b"12:piece length");
        res.extend(piece_length_bytes);
        res.extend(b"6:pieces");
        res.extend(format!("{}:", self.pieces.len() * 20).into_bytes());
        res.extend(self.pieces.iter().flatten());
        res.push(b'e');
        res
    }

    pub fn get_hash(&self) -> Digest {
        let mut sha1 = Sha1::new();
        sha1.update(&self.to_bytes());
        sha1.digest()
    }

    /// URL-escapes the raw (non-hex) info hash bytes per-byte, the format
    /// tracker query strings expect.
    pub fn get_url_encoded_hash(&self) -> String {
        crate::encoding::percent_encode_bytes(&self.get_hash().bytes())
    }

    pub fn get_file_length(&self) -> usize {
        match &self.file_type {
            FileType::MultiFile { files } => files.iter().map(|f| f.length).sum(),
            FileType::SingleFile { length } => *length,
        }
    }
}

impl FileType {
    fn to_bytes(&self) -> Vec<u8> {
        match self {
            FileType::MultiFile { files } => {
                let mut res = vec![b'l'];
                for file in files {
                    res.extend(format!("6:lengthi{}e", file.length).into_bytes());
                    for segment in &file.path {
                        res.extend(format!("4:path{}:{}", segment.len(), segment).into_bytes());
                    }
                }
                res.push(b'e');
                res
            }
            FileType::SingleFile { length } => format!("6:lengthi{}e", length).into_bytes(),
        }
    }
}

impl Info {
    fn parse_info(value: &Bencode) -> Result<Self, TorrentError> {
        let info_table = match value {
            Bencode::Dict(val) => val,
            _ => {
                return Err(TorrentError::InvalidTorrentFile(
                    "info value is not a bencoded dictionary".to_string(),
                ))
            }
        };
        let file_type = Self::resolve_file_type(value)?;
        let name = info_table
            .get("name")
            .and_then(|val| match val {
                BencodeDictValues::Bencode(Bencode::String(s)) => Some(s.to_string()),
                _ => None,
            })
            .ok_or_else(|| {
                TorrentError::InvalidTorrentFile("missing advisory name".to_string())
            })?;

        let piece_length = info_table
            .get("piece length")
            .and_then(|val| match val {
                BencodeDictValues::Bencode(Bencode::Number(i)) => Some(*i as usize),
                _ => None,
            })
            .ok_or_else(|| {
                TorrentError::InvalidTorrentFile("missing piece length".to_string())
            })?;

        let pieces = match info_table.get("pieces") {
            Some(BencodeDictValues::Bytes(bytez)) => bytez
                .iter()
                .map(|chunk| {
                    <[u8; 20]>::try_from(chunk.as_slice())
                        .map_err(|_| TorrentError::InvalidTorrentFile("invalid piece hash".into()))
                })
                .collect::<Result<Vec<_>, _>>()?,
            _ => {
                return Err(TorrentError::InvalidTorrentFile(
                    "no pieces found".to_string(),
                ))
            }
        };

        Ok(Self {
            file_type,
            name,
            piece_length,
            pieces,
        })
    }

    fn resolve_file_type(value: &Bencode) -> Result<FileType, TorrentError> {
        let info_table = match value {
            Bencode::Dict(val) => val,
            _ => {
                return Err(TorrentError::InvalidTorrentFile(
                    "info value is not a bencoded dictionary".to_string(),
                ))
            }
        };

        if let Some(BencodeDictValues::Bencode(Bencode::Number(x))) = info_table.get("length") {
            return Ok(FileType::SingleFile {
                length: *x as usize,
            });
        }

        if let Some(BencodeDictValues::Bencode(Bencode::List(files_list))) =
            info_table.get("files")
        {
            let files = files_list
                .iter()
                .map(Self::parse_file_entry)
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(FileType::MultiFile { files });
        }

        Err(TorrentError::InvalidTorrentFile(
            "could not determine single-file or multi-file layout".to_string(),
        ))
    }

    fn parse_file_entry(bencode: &Bencode) -> Result<File, TorrentError> {
        let file_table = match bencode {
            Bencode::Dict(table) => table,
            _ => {
                return Err(TorrentError::InvalidTorrentFile(
                    "invalid entry in files list".to_string(),
                ))
            }
        };
        let length = match file_table.get("length") {
            Some(BencodeDictValues::Bencode(Bencode::Number(x))) => *x as usize,
            _ => {
                return Err(TorrentError::InvalidTorrentFile(
                    "file entry missing length".to_string(),
                ))
            }
        };
        let path = match file_table.get("path") {
            Some(BencodeDictValues::Bencode(Bencode::List(segments))) => segments
                .iter()
                .map(|segment| match segment {
                    Bencode::String(s) => Ok(s.clone()),
                    _ => Err(TorrentError::InvalidTorrentFile(
                        "invalid path segment".to_string(),
                    )),
                })
                .collect::<Result<Vec<_>, _>>()?,
            _ => {
                return Err(TorrentError::InvalidTorrentFile(
                    "file entry missing path".to_string(),
                ))
            }
        };
        Ok(File { length, path })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_file_torrent(piece_length: usize, pieces: Vec<[u8; 20]>, length: usize) -> Torrent {
        Torrent {
            announce: Some("http://tracker.example/announce".to_string()),
            info: Info {
                file_type: FileType::SingleFile { length },
                name: "file.bin".to_string(),
                piece_length,
                pieces,
            },
        }
    }

    #[test]
    fn info_hash_is_deterministic() {
        let t = single_file_torrent(4, vec![[1u8; 20], [2u8; 20]], 8);
        assert_eq!(t.info_hash(), t.info_hash());
    }

    #[test]
    fn total_length_matches_single_file_length() {
        let t = single_file_torrent(4, vec![[0u8; 20]], 4);
        assert_eq!(t.total_length(), 4);
    }

    #[test]
    fn url_encoded_hash_escapes_every_byte() {
        let t = single_file_torrent(4, vec![[0u8; 20]], 4);
        let encoded = t.info.get_url_encoded_hash();
        assert_eq!(encoded.matches('%').count(), 20);
    }
}
