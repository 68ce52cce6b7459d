//! Word-organised block RAM with byte lane enables

use super::{
    BusRequest,
    BusResponse,
    Slave,
};

#[derive(Debug, Clone)]
pub struct Ram {
    words: Vec<u32>,
}

impl Ram {
    /// A zeroed RAM of `bytes` bytes, rounded up to whole words
    #[must_use]
    pub fn new(bytes: u32) -> Self {
        Self {
            words: vec![0; bytes.div_ceil(4) as usize],
        }
    }

    /// Size in bytes
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn size(&self) -> u32 {
        self.words.len() as u32 * 4
    }

    /// The word at word index `index`
    #[must_use]
    pub fn word(&self, index: usize) -> Option<u32> {
        self.words.get(index).copied()
    }
}

impl Slave for Ram {
    fn transact(&mut self, req: &BusRequest) -> BusResponse {
        let index = (req.addr / 4) as usize;
        let Some(word) = self.words.get_mut(index) else {
            return BusResponse::ack(0);
        };
        if req.write {
            let mask = req.lane_mask();
            *word = (*word & !mask) | (req.data & mask);
            BusResponse::ack(0)
        } else {
            BusResponse::ack(*word)
        }
    }
}
