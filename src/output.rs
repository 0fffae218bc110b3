//! Plain-text writers for variant calls and diagnostics

use crate::caller::CallSet;
use crate::minor::MinorCaller;
use crate::nucleotide::{self, ALPHABET_SIZE};
use crate::reference::ReferenceLibrary;
use crate::utils::{ensure_parent_dirs, has_extension};
use crate::UmivarResult;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Open a buffered writer, gzip compressed when the path ends in `.gz`
pub fn create_writer(path: &Path) -> UmivarResult<Box<dyn Write>> {
    ensure_parent_dirs(path)?;
    let file = File::create(path)?;
    let writer: Box<dyn Write> = if has_extension(path, "gz") {
        Box::new(BufWriter::new(GzEncoder::new(file, Compression::default())))
    } else {
        Box::new(BufWriter::new(file))
    };
    Ok(writer)
}

fn reference_name(library: &ReferenceLibrary, index: usize) -> String {
    library
        .get(index)
        .map(|r| r.name().to_string())
        .unwrap_or_else(|| index.to_string())
}

/// Variant table with 1-based positions and the filter outcome
pub fn write_variants(
    call_set: &CallSet,
    library: &ReferenceLibrary,
    output_path: &Path,
) -> UmivarResult<()> {
    let mut writer = create_writer(output_path)?;

    for (id, description) in call_set.filters() {
        writeln!(writer, "#filter\t{}\t{}", id, description)?;
    }
    writeln!(
        writer,
        "reference\tpos\tref\talt\tcount\tminor_count\tcoverage\tfrequency\tquality\tmean_quality\terror_rate\tancestral\thas_reference\tfilter"
    )?;

    for variant in call_set.variants() {
        let mean_quality = variant
            .mean_quality()
            .map(|q| format!("{:.1}", q))
            .unwrap_or_else(|| "NA".to_string());

        writeln!(
            writer,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{:.6e}\t{:.1}\t{}\t{:.3e}\t{}\t{}\t{}",
            reference_name(library, variant.reference()),
            variant.position() + 1,
            variant.ref_allele(),
            variant.alt_allele(),
            variant.count(),
            variant.minor_count(),
            variant.coverage(),
            variant.frequency(),
            variant.quality(),
            mean_quality,
            variant.error_rate(),
            variant.ancestral(),
            variant.has_reference(),
            call_set.filter_status(variant),
        )?;
    }

    writer.flush()?;
    log::info!(
        "Wrote {} variants to {}",
        call_set.len(),
        output_path.display()
    );
    Ok(())
}

/// Per-class minor caller summary, or every individual test in debug mode
pub fn write_minor_matrix(minor_caller: &MinorCaller, output_path: &Path) -> UmivarResult<()> {
    let mut writer = create_writer(output_path)?;

    if minor_caller.config().debug {
        writeln!(writer, "from\tto\tk\tn\tp")?;
        for record in minor_caller.debug_records() {
            writeln!(
                writer,
                "{}\t{}\t{}\t{}\t{}",
                nucleotide::symbol_from_code(record.from),
                nucleotide::symbol_from_code(record.to),
                record.k,
                record.n,
                record.p_value
            )?;
        }
    } else {
        writeln!(writer, "from\tto\tm1\tm\tfdr\tread_fraction")?;
        for from in 0..ALPHABET_SIZE as u8 {
            for to in 0..ALPHABET_SIZE as u8 {
                writeln!(
                    writer,
                    "{}\t{}\t{}\t{}\t{}\t{:.4}",
                    nucleotide::symbol_from_code(from),
                    nucleotide::symbol_from_code(to),
                    minor_caller.tests_passed(from, to),
                    minor_caller.tests_run(from, to),
                    minor_caller.compute_fdr(from, to),
                    minor_caller.read_fraction_for_called_minors(from, to)
                )?;
            }
        }
    }

    writer.flush()?;
    Ok(())
}

/// Per-position coverage and error model diagnostics
pub fn write_position_report(
    call_set: &CallSet,
    library: &ReferenceLibrary,
    output_path: &Path,
) -> UmivarResult<()> {
    let mut writer = create_writer(output_path)?;

    let symbols: Vec<char> = (0..ALPHABET_SIZE as u8)
        .map(nucleotide::symbol_from_code)
        .collect();
    let counts_header: Vec<String> = symbols.iter().map(|s| format!("count.{}", s)).collect();
    let scores_header: Vec<String> = symbols.iter().map(|s| format!("score.{}", s)).collect();

    writeln!(
        writer,
        "reference\tpos\thas_reference\tgood_coverage\tgood_quality\t{}\t{}",
        counts_header.join("\t"),
        scores_header.join("\t")
    )?;

    for stats in call_set.position_stats() {
        let counts: Vec<String> = stats.counts.iter().map(|c| c.to_string()).collect();
        let scores: Vec<String> = stats.scores.iter().map(|s| format!("{:.4}", s)).collect();
        writeln!(
            writer,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}",
            reference_name(library, stats.reference),
            stats.position + 1,
            stats.has_reference,
            stats.coverage_ok,
            stats.quality_ok,
            counts.join("\t"),
            scores.join("\t")
        )?;
    }

    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alignment::LocalAlignment;
    use crate::caller::VariantCaller;
    use crate::config::{MinorCallerConfig, VariantCallerConfig};
    use crate::mutation::{Mutation, MutationCode};
    use crate::nucleotide::{A, C, G, T};
    use crate::table::TableLibrary;
    use flate2::read::MultiGzDecoder;
    use std::io::Read;
    use tempfile::tempdir;

    fn call_set(library: &ReferenceLibrary) -> CallSet {
        let mut tables = TableLibrary::new(library);
        let table = tables.table(0).unwrap();
        let alignment = LocalAlignment::ungapped(0..8, 0).unwrap();
        let major = Mutation::Substitution(MutationCode::substitution(3, T, C));
        for i in 0..150 {
            let majors = if i < 15 { vec![major.clone()] } else { vec![] };
            table.append(&alignment, &[30; 8], &majors, &[]);
        }

        VariantCaller::new(&VariantCallerConfig::default())
            .unwrap()
            .with_position_stats(true)
            .call(&mut tables, &MinorCaller::new(&MinorCallerConfig::default()))
            .unwrap()
    }

    #[test]
    fn test_write_variants() {
        let library = ReferenceLibrary::from_sequences([("amp1", "ACGTACGT")]).unwrap();
        let calls = call_set(&library);
        let dir = tempdir().unwrap();
        let path = dir.path().join("variants.tsv");

        write_variants(&calls, &library, &path).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();

        assert_eq!(lines.len(), 5);
        assert!(lines[0].starts_with("#filter\tq20"));
        assert!(lines[3].starts_with("reference\tpos\tref\talt"));
        let fields: Vec<&str> = lines[4].split('\t').collect();
        assert_eq!(&fields[..5], &["amp1", "4", "T", "C", "15"]);
        assert_eq!(fields[13], "PASS");
    }

    #[test]
    fn test_write_variants_gzip() {
        let library = ReferenceLibrary::from_sequences([("amp1", "ACGTACGT")]).unwrap();
        let calls = call_set(&library);
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/variants.tsv.gz");

        write_variants(&calls, &library, &path).unwrap();
        let mut content = String::new();
        MultiGzDecoder::new(File::open(&path).unwrap())
            .read_to_string(&mut content)
            .unwrap();
        assert!(content.contains("amp1\t4\tT\tC"));
    }

    #[test]
    fn test_write_minor_matrix() {
        let dir = tempdir().unwrap();
        let caller = MinorCaller::new(&MinorCallerConfig::default());
        caller.call_and_update(A, G, 5, 20);
        let path = dir.path().join("minors.tsv");

        write_minor_matrix(&caller, &path).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "from\tto\tm1\tm\tfdr\tread_fraction");
        assert_eq!(lines.len(), 17);
        let called = lines.iter().find(|l| l.starts_with("A\tG\t1\t1\t")).unwrap();
        assert!(called.ends_with("\t0.2500"));
        assert!(lines.iter().any(|l| l.starts_with("C\tT\t0\t0\t0\t0.0000")));
    }

    #[test]
    fn test_write_minor_debug_records() {
        let dir = tempdir().unwrap();
        let caller = MinorCaller::new(&MinorCallerConfig::default().with_debug(true));
        caller.call_and_update(C, T, 2, 12);
        let path = dir.path().join("minors.debug.tsv");

        write_minor_matrix(&caller, &path).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "from\tto\tk\tn\tp");
        assert!(lines[1].starts_with("C\tT\t2\t12\t"));
    }

    #[test]
    fn test_write_position_report() {
        let library = ReferenceLibrary::from_sequences([("amp1", "ACGTACGT")]).unwrap();
        let calls = call_set(&library);
        let dir = tempdir().unwrap();
        let path = dir.path().join("positions.tsv");

        write_position_report(&calls, &library, &path).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 9);
        assert!(lines[0].contains("count.A\tcount.C\tcount.G\tcount.T"));
        let fields: Vec<&str> = lines[4].split('\t').collect();
        assert_eq!(&fields[..5], &["amp1", "4", "true", "true", "true"]);
        assert_eq!(&fields[5..9], &["0", "15", "0", "135"]);
        assert_eq!(fields[12], "0.0000");
    }
}
