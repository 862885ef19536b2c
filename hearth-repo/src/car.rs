use crate::block_map::BlockMap;
use crate::cbor;
use crate::types::CidAndBytes;
use anyhow::{anyhow, bail, Result};
use lexicon_cid::Cid;
use serde::{Deserialize, Serialize};

/// CAR v1 header: `{roots, version}` behind a varint length prefix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarHeader {
    pub roots: Vec<Cid>,
    pub version: u64,
}

pub struct CarWithRoot {
    pub root: Cid,
    pub blocks: BlockMap,
}

pub struct CarToBlocksOutput {
    pub roots: Vec<Cid>,
    pub blocks: BlockMap,
}

fn write_varint(out: &mut Vec<u8>, value: u64) {
    let mut buf = unsigned_varint::encode::u64_buffer();
    out.extend_from_slice(unsigned_varint::encode::u64(value, &mut buf));
}

/// Serializes blocks in the order given: each block is
/// `varint(len(cid) + len(data)) || cid || data`.
pub fn blocks_to_car<I>(root: Option<&Cid>, blocks: I) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = CidAndBytes>,
{
    let header = CarHeader {
        roots: root.map(|r| vec![*r]).unwrap_or_default(),
        version: 1,
    };
    let header_bytes = cbor::struct_to_cbor(&header)?;
    let mut out = Vec::new();
    write_varint(&mut out, header_bytes.len() as u64);
    out.extend_from_slice(&header_bytes);
    for CidAndBytes { cid, bytes } in blocks {
        let cid_bytes = cid.to_bytes();
        write_varint(&mut out, (cid_bytes.len() + bytes.len()) as u64);
        out.extend_from_slice(&cid_bytes);
        out.extend_from_slice(&bytes);
    }
    Ok(out)
}

pub fn read_car(bytes: &[u8]) -> Result<CarToBlocksOutput> {
    let (header_len, mut rest) = unsigned_varint::decode::u64(bytes)
        .map_err(|e| anyhow!("invalid CAR header length: {e}"))?;
    let header_len = header_len as usize;
    if rest.len() < header_len {
        bail!("truncated CAR header");
    }
    let header: CarHeader = cbor::cbor_to_struct(&rest[..header_len])?;
    if header.version != 1 {
        bail!("unsupported CAR version: {}", header.version);
    }
    rest = &rest[header_len..];

    let mut blocks = BlockMap::new();
    while !rest.is_empty() {
        let (block_len, after_len) = unsigned_varint::decode::u64(rest)
            .map_err(|e| anyhow!("invalid CAR block length: {e}"))?;
        let block_len = block_len as usize;
        if after_len.len() < block_len {
            bail!("truncated CAR block");
        }
        let mut block = &after_len[..block_len];
        let cid = Cid::read_bytes(&mut block).map_err(|e| anyhow!("invalid CID in CAR: {e}"))?;
        blocks.set(cid, block.to_vec());
        rest = &after_len[block_len..];
    }
    Ok(CarToBlocksOutput {
        roots: header.roots,
        blocks,
    })
}

pub fn read_car_with_root(bytes: &[u8]) -> Result<CarWithRoot> {
    let CarToBlocksOutput { roots, blocks } = read_car(bytes)?;
    if roots.len() != 1 {
        bail!("Expected one root, got {}", roots.len());
    }
    Ok(CarWithRoot {
        root: roots[0],
        blocks,
    })
}
