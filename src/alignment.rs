//! Aligned consensus input and extraction of major/minor mutations in
//! reference coordinates

use crate::mutation::{self, Mutation, MutationCode, MutationType};
use crate::reference::Reference;
use crate::{UmivarError, UmivarResult};
use std::ops::Range;

/// Local alignment of a consensus against a reference.
///
/// Mutation codes are relative to the start of the aligned ranges: position
/// 0 is `reference_range.start` in the reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalAlignment {
    reference_range: Range<u32>,
    consensus_range: Range<u32>,
    mutations: Vec<MutationCode>,
}

impl LocalAlignment {
    pub fn new(
        reference_range: Range<u32>,
        consensus_range: Range<u32>,
        mutations: Vec<MutationCode>,
    ) -> UmivarResult<Self> {
        if reference_range.is_empty() || consensus_range.is_empty() {
            return Err(UmivarError::InvalidMutation(format!(
                "Empty alignment ranges {:?} / {:?}",
                reference_range, consensus_range
            )));
        }

        // only an insertion may sit right after the last aligned base
        let span = reference_range.end - reference_range.start;
        if let Some(code) = mutations.iter().find(|c| {
            c.position() > span || (c.position() == span && c.kind() != MutationType::Insertion)
        }) {
            return Err(UmivarError::InvalidMutation(format!(
                "Mutation {} outside of aligned range of length {}",
                code, span
            )));
        }

        if mutations.windows(2).any(|w| w[0].position() > w[1].position()) {
            return Err(UmivarError::InvalidMutation(
                "Alignment mutations must be ordered by position".to_string(),
            ));
        }

        Ok(Self {
            reference_range,
            consensus_range,
            mutations,
        })
    }

    /// Gapless alignment of a consensus to `reference_range`
    pub fn ungapped(reference_range: Range<u32>, consensus_start: u32) -> UmivarResult<Self> {
        let len = reference_range.end.saturating_sub(reference_range.start);
        Self::new(
            reference_range,
            consensus_start..consensus_start + len,
            Vec::new(),
        )
    }

    pub fn reference_range(&self) -> Range<u32> {
        self.reference_range.clone()
    }

    pub fn consensus_range(&self) -> Range<u32> {
        self.consensus_range.clone()
    }

    pub fn mutations(&self) -> &[MutationCode] {
        &self.mutations
    }

    /// Consensus position aligned to an absolute reference position, `None`
    /// if the position is outside the alignment or deleted in the consensus
    pub fn convert_position(&self, reference_pos: u32) -> Option<u32> {
        if !self.reference_range.contains(&reference_pos) {
            return None;
        }
        let relative = reference_pos - self.reference_range.start;
        mutation::convert_position(&self.mutations, relative)
            .map(|p| p + self.consensus_range.start)
            .filter(|p| self.consensus_range.contains(p))
    }
}

/// A read-level mutation observed inside a MIG together with the evidence
/// needed to test it: `supporting_reads` out of `total_reads` carry it.
/// The code is in consensus coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MinorCandidate {
    pub code: MutationCode,
    pub supporting_reads: u32,
    pub total_reads: u32,
}

/// A quality-annotated consensus aligned to a reference
#[derive(Debug, Clone)]
pub struct Consensus {
    /// Index of the reference in the library
    pub reference: usize,
    pub alignment: LocalAlignment,
    /// Phred qualities of the consensus bases
    pub quality: Vec<u8>,
    /// Number of reads in the MIG
    pub read_count: u32,
    pub minors: Vec<MinorCandidate>,
}

/// Translates the mutations of one aligned consensus into reference
/// coordinates.
pub struct MutationExtractor<'a> {
    alignment: &'a LocalAlignment,
    relative: Vec<MutationCode>,
    inverted: Vec<MutationCode>,
}

impl<'a> MutationExtractor<'a> {
    /// Canonicalize indels, drop redundant edits and substitutions at
    /// consensus bases with quality <= `quality_threshold`.
    pub fn new(
        reference: &Reference,
        alignment: &'a LocalAlignment,
        quality: &[u8],
        quality_threshold: u8,
    ) -> Self {
        let range = alignment.reference_range();
        let end = (range.end as usize).min(reference.len());
        let start = (range.start as usize).min(end);
        let aligned = &reference.sequence()[start..end];

        let mut codes = alignment.mutations().to_vec();
        mutation::shift_indels_at_homopolymers(aligned, &mut codes);
        let codes = mutation::filter_redundant(&codes);

        let consensus_start = alignment.consensus_range().start;
        let relative: Vec<MutationCode> = codes
            .iter()
            .copied()
            .filter(|code| {
                if !code.is_substitution() {
                    return true;
                }
                mutation::convert_position(&codes, code.position())
                    .and_then(|p| quality.get((p + consensus_start) as usize))
                    .is_some_and(|&q| q > quality_threshold)
            })
            .collect();

        let inverted = mutation::invert(&relative);

        Self {
            alignment,
            relative,
            inverted,
        }
    }

    /// Major mutations in absolute reference coordinates
    pub fn major_mutations(&self) -> Vec<Mutation> {
        let absolute =
            mutation::move_codes(&self.relative, self.alignment.reference_range().start as i64);
        Mutation::from_codes(&absolute)
    }

    /// Move a minor mutation from consensus to reference coordinates.
    ///
    /// Returns `None` if it falls outside either aligned range.
    pub fn minor_to_reference(&self, code: MutationCode) -> Option<MutationCode> {
        let consensus_range = self.alignment.consensus_range();
        let reference_range = self.alignment.reference_range();
        let pos = code.position();

        if !consensus_range.contains(&pos) {
            return None;
        }

        let relative = mutation::convert_position(&self.inverted, pos - consensus_range.start)?;
        let reference_pos = relative + reference_range.start;

        reference_range
            .contains(&reference_pos)
            .then(|| code.moved(reference_pos as i64 - pos as i64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nucleotide::{A, C, G, T};

    fn reference() -> Reference {
        Reference::new(0, "amp", "ACGTTTTGCA").unwrap()
    }

    #[test]
    fn test_alignment_validation() {
        assert!(LocalAlignment::new(0..0, 0..4, vec![]).is_err());
        assert!(LocalAlignment::new(0..4, 0..4, vec![MutationCode::substitution(9, A, C)]).is_err());
        // one past the aligned range only an insertion is allowed
        assert!(LocalAlignment::new(0..4, 0..4, vec![MutationCode::substitution(4, A, C)]).is_err());
        assert!(LocalAlignment::new(0..4, 0..4, vec![MutationCode::deletion(4, A)]).is_err());
        assert!(LocalAlignment::new(0..4, 0..5, vec![MutationCode::insertion(4, C)]).is_ok());
        assert!(LocalAlignment::new(
            0..4,
            0..4,
            vec![
                MutationCode::substitution(3, A, C),
                MutationCode::substitution(1, A, C)
            ]
        )
        .is_err());
    }

    #[test]
    fn test_convert_position_with_offsets() {
        // reference 2..8 aligned to consensus 5..10, reference base 4 deleted
        let alignment =
            LocalAlignment::new(2..8, 5..10, vec![MutationCode::deletion(2, T)]).unwrap();
        assert_eq!(alignment.convert_position(1), None);
        assert_eq!(alignment.convert_position(2), Some(5));
        assert_eq!(alignment.convert_position(3), Some(6));
        assert_eq!(alignment.convert_position(4), None);
        assert_eq!(alignment.convert_position(5), Some(7));
        assert_eq!(alignment.convert_position(8), None);
    }

    #[test]
    fn test_major_mutations_are_absolute_and_quality_filtered() {
        let reference = reference();
        let alignment = LocalAlignment::new(
            1..9,
            0..8,
            vec![
                MutationCode::substitution(0, C, A),
                MutationCode::substitution(6, G, T),
            ],
        )
        .unwrap();
        let mut quality = vec![30u8; 8];
        quality[6] = 10;

        let extractor = MutationExtractor::new(&reference, &alignment, &quality, 15);
        let majors = extractor.major_mutations();
        assert_eq!(
            majors,
            vec![Mutation::Substitution(MutationCode::substitution(1, C, A))]
        );
    }

    #[test]
    fn test_major_deletion_canonicalized_in_homopolymer() {
        let reference = reference();
        // deleting the last T of TTTT is reported at the first T
        let alignment =
            LocalAlignment::new(0..10, 0..9, vec![MutationCode::deletion(6, T)]).unwrap();
        let extractor = MutationExtractor::new(&reference, &alignment, &[40; 9], 15);
        assert_eq!(
            extractor.major_mutations(),
            vec![Mutation::Deletion {
                position: 3,
                bases: vec![T]
            }]
        );
    }

    #[test]
    fn test_minor_moved_to_reference_frame() {
        let reference = reference();
        // consensus has one extra base inserted before reference position 5
        let alignment =
            LocalAlignment::new(2..10, 0..9, vec![MutationCode::insertion(3, G)]).unwrap();
        let extractor = MutationExtractor::new(&reference, &alignment, &[40; 9], 15);

        // consensus 0 is reference 2
        let minor = MutationCode::substitution(0, G, A);
        assert_eq!(
            extractor.minor_to_reference(minor),
            Some(MutationCode::substitution(2, G, A))
        );

        // consensus 5 sits after the inserted base, reference 6
        let minor = MutationCode::substitution(5, T, C);
        assert_eq!(
            extractor.minor_to_reference(minor).map(|c| c.position()),
            Some(6)
        );

        // outside the aligned consensus
        assert_eq!(
            extractor.minor_to_reference(MutationCode::substitution(12, A, C)),
            None
        );
    }
}
