//! Mutation codec: packed 32-bit mutation codes, indel run coalescing and
//! coordinate utilities for translating positions between the reference and
//! consensus frames.
//!
//! Code layout (least significant bit first):
//!
//! | bits  | field     |
//! |-------|-----------|
//! | 0-1   | to base   |
//! | 2-3   | from base |
//! | 4-5   | type tag  |
//! | 6-31  | position  |
//!
//! Codes in a mutation list are ordered by position. An insertion at
//! position `p` inserts its base before the sequence base at `p`; a
//! deletion at `p` removes the base at `p`.

use crate::{nucleotide, UmivarError, UmivarResult};
use std::fmt;

const TO_SHIFT: u32 = 0;
const FROM_SHIFT: u32 = 2;
const TYPE_SHIFT: u32 = 4;
const POSITION_SHIFT: u32 = 6;
const BASE_MASK: u32 = 0b11;

const SUBSTITUTION_TAG: u32 = 0b01;
const DELETION_TAG: u32 = 0b10;
const INSERTION_TAG: u32 = 0b11;

/// Largest position representable in a mutation code
pub const MAX_POSITION: u32 = (1 << (32 - POSITION_SHIFT)) - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MutationType {
    Substitution,
    Deletion,
    Insertion,
}

impl MutationType {
    pub fn symbol(self) -> char {
        match self {
            MutationType::Substitution => 'S',
            MutationType::Deletion => 'D',
            MutationType::Insertion => 'I',
        }
    }
}

/// A single-base edit packed into 32 bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MutationCode(u32);

impl MutationCode {
    fn encode(tag: u32, position: u32, from: u8, to: u8) -> Self {
        assert!(
            position <= MAX_POSITION,
            "Mutation position {} exceeds {}",
            position,
            MAX_POSITION
        );
        Self(
            (position << POSITION_SHIFT)
                | (tag << TYPE_SHIFT)
                | ((from as u32 & BASE_MASK) << FROM_SHIFT)
                | ((to as u32 & BASE_MASK) << TO_SHIFT),
        )
    }

    pub fn substitution(position: u32, from: u8, to: u8) -> Self {
        Self::encode(SUBSTITUTION_TAG, position, from, to)
    }

    pub fn deletion(position: u32, from: u8) -> Self {
        Self::encode(DELETION_TAG, position, from, 0)
    }

    pub fn insertion(position: u32, to: u8) -> Self {
        Self::encode(INSERTION_TAG, position, 0, to)
    }

    /// Rebuild a code from its raw representation
    pub fn from_raw(raw: u32) -> UmivarResult<Self> {
        if (raw >> TYPE_SHIFT) & 0b11 == 0 {
            return Err(UmivarError::InvalidMutation(format!(
                "Missing type tag in mutation code {:#x}",
                raw
            )));
        }
        Ok(Self(raw))
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    pub fn position(self) -> u32 {
        self.0 >> POSITION_SHIFT
    }

    pub fn from_base(self) -> u8 {
        ((self.0 >> FROM_SHIFT) & BASE_MASK) as u8
    }

    pub fn to_base(self) -> u8 {
        ((self.0 >> TO_SHIFT) & BASE_MASK) as u8
    }

    pub fn kind(self) -> MutationType {
        match (self.0 >> TYPE_SHIFT) & 0b11 {
            SUBSTITUTION_TAG => MutationType::Substitution,
            DELETION_TAG => MutationType::Deletion,
            _ => MutationType::Insertion,
        }
    }

    pub fn is_substitution(self) -> bool {
        self.kind() == MutationType::Substitution
    }

    /// Shift the position by `delta`
    pub fn moved(self, delta: i64) -> Self {
        let position = self.position() as i64 + delta;
        assert!(
            (0..=MAX_POSITION as i64).contains(&position),
            "Moving {} by {} leaves the representable range",
            self,
            delta
        );
        let low_bits = self.0 & ((1 << POSITION_SHIFT) - 1);
        Self(((position as u32) << POSITION_SHIFT) | low_bits)
    }
}

impl fmt::Display for MutationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let from = nucleotide::symbol_from_code(self.from_base());
        let to = nucleotide::symbol_from_code(self.to_base());
        match self.kind() {
            MutationType::Substitution => write!(f, "S{}:{}>{}", self.position(), from, to),
            MutationType::Deletion => write!(f, "D{}:{}>", self.position(), from),
            MutationType::Insertion => write!(f, "I{}:>{}", self.position(), to),
        }
    }
}

/// Shift every code in a list by `delta`
pub fn move_codes(codes: &[MutationCode], delta: i64) -> Vec<MutationCode> {
    codes.iter().map(|code| code.moved(delta)).collect()
}

/// Translate a position in the first sequence into the second sequence.
///
/// Returns `None` when the base at `position` is deleted.
pub fn convert_position(codes: &[MutationCode], position: u32) -> Option<u32> {
    let mut offset: i64 = 0;

    for code in codes {
        let pos = code.position();
        if pos > position {
            break;
        }
        match code.kind() {
            MutationType::Substitution => {}
            MutationType::Deletion => {
                if pos == position {
                    return None;
                }
                offset -= 1;
            }
            MutationType::Insertion => offset += 1,
        }
    }

    u32::try_from(position as i64 + offset).ok()
}

/// Build the mutation list that transforms the second sequence back into
/// the first one.
pub fn invert(codes: &[MutationCode]) -> Vec<MutationCode> {
    let mut offset: i64 = 0;
    let mut inverted = Vec::with_capacity(codes.len());

    for &code in codes {
        let pos = (code.position() as i64 + offset) as u32;
        match code.kind() {
            MutationType::Substitution => {
                inverted.push(MutationCode::substitution(
                    pos,
                    code.to_base(),
                    code.from_base(),
                ));
            }
            MutationType::Deletion => {
                inverted.push(MutationCode::insertion(pos, code.from_base()));
                offset -= 1;
            }
            MutationType::Insertion => {
                inverted.push(MutationCode::deletion(pos, code.to_base()));
                offset += 1;
            }
        }
    }

    inverted
}

fn extends_run(kind: MutationType, last: u32, position: u32) -> bool {
    match kind {
        MutationType::Insertion => last == position,
        MutationType::Deletion => last + 1 == position,
        MutationType::Substitution => false,
    }
}

/// Move indels inside homopolymer runs to the leftmost equivalent position.
///
/// Indel runs are moved as a block and only when every base of the run is
/// the same; a run never crosses the preceding mutation.
pub fn shift_indels_at_homopolymers(sequence: &[u8], codes: &mut [MutationCode]) {
    let mut i = 0;
    while i < codes.len() {
        let kind = codes[i].kind();
        if kind == MutationType::Substitution {
            i += 1;
            continue;
        }

        let mut end = i + 1;
        while end < codes.len()
            && codes[end].kind() == kind
            && extends_run(kind, codes[end - 1].position(), codes[end].position())
        {
            end += 1;
        }

        let base_of = |code: MutationCode| match kind {
            MutationType::Deletion => code.from_base(),
            _ => code.to_base(),
        };
        let base = base_of(codes[i]);
        let homopolymer = codes[i..end].iter().all(|&c| base_of(c) == base);

        if homopolymer {
            let lower = if i > 0 { codes[i - 1].position() + 1 } else { 0 };
            let start = codes[i].position();
            let mut shifted = start;
            while shifted > lower
                && sequence.get(shifted as usize - 1).copied() == Some(base)
            {
                shifted -= 1;
            }

            if shifted != start {
                let delta = shifted as i64 - start as i64;
                for code in &mut codes[i..end] {
                    *code = code.moved(delta);
                }
            }
        }

        i = end;
    }
}

/// Drop edits that leave the sequence unchanged: substitutions to the same
/// base and insertion/deletion pairs of the same base that cancel out.
pub fn filter_redundant(codes: &[MutationCode]) -> Vec<MutationCode> {
    let mut filtered = Vec::with_capacity(codes.len());
    let mut i = 0;

    while i < codes.len() {
        let code = codes[i];
        if code.is_substitution() && code.from_base() == code.to_base() {
            i += 1;
            continue;
        }
        if let Some(&next) = codes.get(i + 1) {
            if cancels(code, next) {
                i += 2;
                continue;
            }
        }
        filtered.push(code);
        i += 1;
    }

    filtered
}

fn cancels(first: MutationCode, second: MutationCode) -> bool {
    match (first.kind(), second.kind()) {
        (MutationType::Deletion, MutationType::Insertion) => {
            second.to_base() == first.from_base() && second.position() == first.position() + 1
        }
        (MutationType::Insertion, MutationType::Deletion) => {
            first.to_base() == second.from_base() && first.position() == second.position()
        }
        _ => false,
    }
}

type IndelRun = (MutationType, u32, u32, Vec<u8>);

/// A mutation observed between a reference and a consensus
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Mutation {
    Substitution(MutationCode),
    Insertion { position: u32, bases: Vec<u8> },
    Deletion { position: u32, bases: Vec<u8> },
}

impl Mutation {
    /// Coalesce an ordered code list into mutation records.
    ///
    /// Adjacent insertion codes at the same position and deletion codes at
    /// consecutive positions form one run; a substitution always closes the
    /// current run.
    pub fn from_codes(codes: &[MutationCode]) -> Vec<Mutation> {
        let mut mutations = Vec::with_capacity(codes.len());
        // (kind, first position, last position, bases)
        let mut run: Option<IndelRun> = None;

        let flush = |run: &mut Option<IndelRun>, mutations: &mut Vec<Mutation>| {
            if let Some((kind, position, _, bases)) = run.take() {
                mutations.push(match kind {
                    MutationType::Insertion => Mutation::Insertion { position, bases },
                    _ => Mutation::Deletion { position, bases },
                });
            }
        };

        for &code in codes {
            let kind = code.kind();
            if kind == MutationType::Substitution {
                flush(&mut run, &mut mutations);
                mutations.push(Mutation::Substitution(code));
                continue;
            }

            let base = if kind == MutationType::Insertion {
                code.to_base()
            } else {
                code.from_base()
            };

            match run.as_mut() {
                Some((run_kind, _, last, bases))
                    if *run_kind == kind && extends_run(kind, *last, code.position()) =>
                {
                    *last = code.position();
                    bases.push(base);
                }
                _ => {
                    flush(&mut run, &mut mutations);
                    run = Some((kind, code.position(), code.position(), vec![base]));
                }
            }
        }

        flush(&mut run, &mut mutations);
        mutations
    }

    pub fn kind(&self) -> MutationType {
        match self {
            Mutation::Substitution(_) => MutationType::Substitution,
            Mutation::Insertion { .. } => MutationType::Insertion,
            Mutation::Deletion { .. } => MutationType::Deletion,
        }
    }

    pub fn start(&self) -> u32 {
        match self {
            Mutation::Substitution(code) => code.position(),
            Mutation::Insertion { position, .. } | Mutation::Deletion { position, .. } => {
                *position
            }
        }
    }

    /// Exclusive end in reference coordinates
    pub fn end(&self) -> u32 {
        match self {
            Mutation::Substitution(code) => code.position() + 1,
            Mutation::Insertion { position, .. } => *position,
            Mutation::Deletion { position, bases } => *position + bases.len() as u32,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Mutation::Substitution(_) => 1,
            Mutation::Insertion { bases, .. } | Mutation::Deletion { bases, .. } => bases.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ref_allele(&self) -> String {
        match self {
            Mutation::Substitution(code) => {
                nucleotide::symbol_from_code(code.from_base()).to_string()
            }
            Mutation::Insertion { .. } => String::new(),
            Mutation::Deletion { bases, .. } => nucleotide::decode(bases),
        }
    }

    pub fn alt_allele(&self) -> String {
        match self {
            Mutation::Substitution(code) => {
                nucleotide::symbol_from_code(code.to_base()).to_string()
            }
            Mutation::Insertion { bases, .. } => nucleotide::decode(bases),
            Mutation::Deletion { .. } => String::new(),
        }
    }

    /// Expand back into single-base codes
    pub fn codes(&self) -> Vec<MutationCode> {
        match self {
            Mutation::Substitution(code) => vec![*code],
            Mutation::Insertion { position, bases } => bases
                .iter()
                .map(|&b| MutationCode::insertion(*position, b))
                .collect(),
            Mutation::Deletion { position, bases } => bases
                .iter()
                .enumerate()
                .map(|(i, &b)| MutationCode::deletion(*position + i as u32, b))
                .collect(),
        }
    }
}

impl fmt::Display for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}:{}>{}",
            self.kind().symbol(),
            self.start(),
            self.ref_allele(),
            self.alt_allele()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nucleotide::{encode, A, C, G, T};

    /// Apply a mutation list to a sequence of nucleotide codes
    fn mutate(sequence: &[u8], codes: &[MutationCode]) -> Vec<u8> {
        let mut result = Vec::with_capacity(sequence.len() + codes.len());
        let mut cursor = 0usize;

        for code in codes {
            let pos = (code.position() as usize).min(sequence.len());
            if cursor < pos {
                result.extend_from_slice(&sequence[cursor..pos]);
                cursor = pos;
            }
            match code.kind() {
                MutationType::Substitution => {
                    result.push(code.to_base());
                    cursor = pos + 1;
                }
                MutationType::Deletion => cursor = pos + 1,
                MutationType::Insertion => result.push(code.to_base()),
            }
        }

        if cursor < sequence.len() {
            result.extend_from_slice(&sequence[cursor..]);
        }
        result
    }

    #[test]
    fn test_code_fields() {
        let code = MutationCode::substitution(1234, A, G);
        assert_eq!(code.position(), 1234);
        assert_eq!(code.from_base(), A);
        assert_eq!(code.to_base(), G);
        assert_eq!(code.kind(), MutationType::Substitution);
        assert_eq!(code.to_string(), "S1234:A>G");

        assert_eq!(MutationCode::deletion(5, T).kind(), MutationType::Deletion);
        assert_eq!(MutationCode::insertion(5, C).kind(), MutationType::Insertion);
        assert_eq!(MutationCode::from_raw(code.raw()).unwrap(), code);
        assert!(MutationCode::from_raw(0).is_err());
    }

    #[test]
    fn test_moved_keeps_bases() {
        let code = MutationCode::substitution(10, C, T).moved(-4);
        assert_eq!(code.position(), 6);
        assert_eq!(code.from_base(), C);
        assert_eq!(code.to_base(), T);
        assert_eq!(move_codes(&[code], 100)[0].position(), 106);
    }

    #[test]
    #[should_panic]
    fn test_moved_below_zero_panics() {
        MutationCode::substitution(1, C, T).moved(-2);
    }

    #[test]
    fn test_convert_position() {
        // insertion before reference position 2, reference position 4 deleted
        let codes = vec![MutationCode::insertion(2, T), MutationCode::deletion(4, A)];
        assert_eq!(convert_position(&codes, 0), Some(0));
        assert_eq!(convert_position(&codes, 1), Some(1));
        assert_eq!(convert_position(&codes, 2), Some(3));
        assert_eq!(convert_position(&codes, 3), Some(4));
        assert_eq!(convert_position(&codes, 4), None);
    }

    #[test]
    fn test_invert_restores_sequence() {
        let reference = encode("ACGTACGTAC").unwrap();
        let codes = vec![
            MutationCode::substitution(1, C, A),
            MutationCode::deletion(3, T),
            MutationCode::deletion(4, A),
            MutationCode::insertion(7, G),
            MutationCode::insertion(7, G),
        ];
        let consensus = mutate(&reference, &codes);
        assert_eq!(consensus, encode("AAGCGGGTAC").unwrap());

        let inverted = invert(&codes);
        assert_eq!(mutate(&consensus, &inverted), reference);
    }

    #[test]
    fn test_moved_and_inverted_positions_round_trip() {
        let codes = vec![
            MutationCode::substitution(2, A, G),
            MutationCode::insertion(5, C),
            MutationCode::deletion(9, T),
        ];

        for delta in [0i64, 3, 17] {
            let moved = move_codes(&codes, delta);
            let inverted = invert(&moved);
            for pos in 0..30u32 {
                let pos = pos + delta as u32;
                if let Some(converted) = convert_position(&moved, pos) {
                    assert_eq!(convert_position(&inverted, converted), Some(pos));
                }
            }
        }
    }

    #[test]
    fn test_from_codes_coalesces_runs() {
        let codes = vec![
            MutationCode::deletion(3, A),
            MutationCode::deletion(4, C),
            MutationCode::substitution(6, G, T),
            MutationCode::insertion(8, T),
            MutationCode::insertion(8, T),
            MutationCode::deletion(10, G),
            MutationCode::deletion(12, G),
        ];

        let mutations = Mutation::from_codes(&codes);
        assert_eq!(
            mutations,
            vec![
                Mutation::Deletion { position: 3, bases: vec![A, C] },
                Mutation::Substitution(MutationCode::substitution(6, G, T)),
                Mutation::Insertion { position: 8, bases: vec![T, T] },
                Mutation::Deletion { position: 10, bases: vec![G] },
                Mutation::Deletion { position: 12, bases: vec![G] },
            ]
        );
        assert_eq!(mutations[0].to_string(), "D3:AC>");
        assert_eq!(mutations[2].to_string(), "I8:>TT");
        assert_eq!(mutations[0].end(), 5);
        assert_eq!(mutations[0].codes(), codes[0..2].to_vec());
    }

    #[test]
    fn test_substitution_flushes_insertion_run() {
        let codes = vec![
            MutationCode::insertion(4, A),
            MutationCode::substitution(4, C, G),
            MutationCode::insertion(4, A),
        ];
        let mutations = Mutation::from_codes(&codes);
        assert_eq!(mutations.len(), 3);
        assert_eq!(mutations[0].kind(), MutationType::Insertion);
        assert_eq!(mutations[2].kind(), MutationType::Insertion);
    }

    #[test]
    fn test_shift_deletion_in_homopolymer() {
        // G A A A A C : deleting any A is the same edit
        let reference = encode("GAAAAC").unwrap();
        let mut codes = vec![MutationCode::deletion(3, A)];
        shift_indels_at_homopolymers(&reference, &mut codes);
        assert_eq!(codes, vec![MutationCode::deletion(1, A)]);

        let mut run = vec![MutationCode::deletion(3, A), MutationCode::deletion(4, A)];
        shift_indels_at_homopolymers(&reference, &mut run);
        assert_eq!(run, vec![MutationCode::deletion(1, A), MutationCode::deletion(2, A)]);
    }

    #[test]
    fn test_shift_insertion_respects_previous_mutation() {
        let reference = encode("CTTTTG").unwrap();
        let mut codes = vec![MutationCode::insertion(5, T)];
        shift_indels_at_homopolymers(&reference, &mut codes);
        assert_eq!(codes, vec![MutationCode::insertion(1, T)]);

        let mut blocked = vec![
            MutationCode::substitution(2, T, A),
            MutationCode::insertion(5, T),
        ];
        shift_indels_at_homopolymers(&reference, &mut blocked);
        assert_eq!(blocked[1], MutationCode::insertion(3, T));
    }

    #[test]
    fn test_shift_leaves_mixed_runs() {
        let reference = encode("AAAACAC").unwrap();
        let mut codes = vec![MutationCode::insertion(4, A), MutationCode::insertion(4, C)];
        let before = codes.clone();
        shift_indels_at_homopolymers(&reference, &mut codes);
        assert_eq!(codes, before);
    }

    #[test]
    fn test_filter_redundant() {
        let codes = vec![
            MutationCode::substitution(1, A, A),
            MutationCode::deletion(3, G),
            MutationCode::insertion(4, G),
            MutationCode::substitution(6, C, T),
            MutationCode::insertion(8, A),
            MutationCode::deletion(8, A),
        ];
        assert_eq!(
            filter_redundant(&codes),
            vec![MutationCode::substitution(6, C, T)]
        );
    }
}
