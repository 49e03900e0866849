use std::collections::{BTreeSet, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;

use super::error::{Result, ScrapeError};
use super::types::{FileFormatArg, SecRecord};

const CSV_HEADERS: [&str; 9] = [
    "Name",
    "ISIN",
    "Symbol",
    "Type",
    "Form",
    "Market",
    "Subsector",
    "Sector",
    "Industry",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct ExportRecord<'a> {
    name: &'a str,
    isin: &'a str,
    symbol: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
    form: &'a str,
    market: &'a str,
    subsector: &'a str,
    sector: &'a str,
    industry: &'a str,
}

impl<'a> From<&'a SecRecord> for ExportRecord<'a> {
    fn from(rec: &'a SecRecord) -> Self {
        Self {
            name: &rec.name,
            isin: &rec.isin,
            symbol: &rec.symbol,
            kind: &rec.kind,
            form: rec.master_value("form"),
            market: rec.master_value("market"),
            subsector: rec.master_value("subsector"),
            sector: rec.master_value("sector"),
            industry: rec.master_value("industry"),
        }
    }
}

impl ExportRecord<'_> {
    fn fields(&self) -> [&str; 9] {
        [
            self.name,
            self.isin,
            self.symbol,
            self.kind,
            self.form,
            self.market,
            self.subsector,
            self.sector,
            self.industry,
        ]
    }
}

/// Orders by sector, then subsector, then name. Stable for full ties.
pub fn sort_records(records: &mut [SecRecord]) {
    records.sort_by(|a, b| {
        a.master_value("sector")
            .cmp(b.master_value("sector"))
            .then_with(|| a.master_value("subsector").cmp(b.master_value("subsector")))
            .then_with(|| a.name.cmp(&b.name))
    });
}

pub fn write_csv<W: Write>(writer: W, records: &[SecRecord]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b';')
        .from_writer(writer);
    writer.write_record(CSV_HEADERS)?;
    for rec in records {
        writer.write_record(ExportRecord::from(rec).fields())?;
    }
    writer.flush().map_err(csv::Error::from)?;
    Ok(())
}

pub fn write_json<W: Write>(mut writer: W, records: &[SecRecord]) -> io::Result<()> {
    let rows = records.iter().map(ExportRecord::from).collect::<Vec<_>>();
    serde_json::to_writer_pretty(&mut writer, &rows).map_err(io::Error::other)?;
    writer.write_all(b"\n")?;
    writer.flush()
}

pub fn export_records<W: Write>(
    writer: W,
    format: FileFormatArg,
    records: &[SecRecord],
    label: &Path,
) -> Result<()> {
    match format {
        FileFormatArg::Csv => write_csv(writer, records),
        FileFormatArg::Json => write_json(writer, records).map_err(|e| ScrapeError::io(label, e)),
    }
}

/// Links, one per line. Blank lines and `#` comments are skipped.
pub fn read_links<R: BufRead>(reader: R) -> io::Result<Vec<String>> {
    let mut links = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let link = line.trim();
        if link.is_empty() || link.starts_with('#') {
            continue;
        }
        links.push(link.to_string());
    }
    Ok(links)
}

/// Reads every link file in order; repeated links keep their first position.
pub fn read_link_files(paths: &[PathBuf]) -> Result<Vec<String>> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for path in paths {
        let file = File::open(path).map_err(|e| ScrapeError::io(path, e))?;
        let links = read_links(BufReader::new(file)).map_err(|e| ScrapeError::io(path, e))?;
        for link in links {
            if seen.insert(link.clone()) {
                out.push(link);
            }
        }
    }
    Ok(out)
}

pub fn write_links<W: Write>(mut writer: W, links: &BTreeSet<String>) -> io::Result<()> {
    for link in links {
        writeln!(writer, "{link}")?;
    }
    writer.flush()
}

/// Checks that `--out` may be written before any browser work starts.
pub fn check_output_path(out: &Path, force: bool) -> Result<()> {
    match fs::metadata(out) {
        Ok(meta) if !meta.is_file() => Err(ScrapeError::Usage(format!(
            "not a regular file: {}",
            out.display()
        ))),
        Ok(_) if !force => Err(ScrapeError::Usage(format!(
            "file already exists: {}, use the --force option to overwrite it",
            out.display()
        ))),
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ScrapeError::io(out, e)),
    }
}

pub fn check_input_files(paths: &[PathBuf]) -> Result<()> {
    for path in paths {
        let meta = fs::metadata(path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                ScrapeError::Usage(format!("file not exist: {}", path.display()))
            } else {
                ScrapeError::io(path, e)
            }
        })?;
        if !meta.is_file() {
            return Err(ScrapeError::Usage(format!(
                "not a regular file: {}",
                path.display()
            )));
        }
    }
    Ok(())
}

/// Output file, or buffered stdout when `out` is `None`.
///
/// Without `force` the file is created exclusively so an existing file is
/// never clobbered.
pub fn open_output(out: Option<&Path>, force: bool) -> Result<Box<dyn Write>> {
    let Some(path) = out else {
        return Ok(Box::new(BufWriter::new(io::stdout().lock())));
    };
    let mut options = OpenOptions::new();
    options.write(true);
    if force {
        options.create(true).truncate(true);
    } else {
        options.create_new(true);
    }
    let file = options.open(path).map_err(|e| ScrapeError::io(path, e))?;
    Ok(Box::new(BufWriter::new(file)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn record(name: &str, sector: &str, subsector: &str) -> SecRecord {
        let mut rec = SecRecord::new(format!("https://www.boerse-frankfurt.de/equity/{name}"));
        rec.name = name.to_string();
        if !sector.is_empty() {
            rec.master.insert("sector".to_string(), sector.to_string());
        }
        if !subsector.is_empty() {
            rec.master.insert("subsector".to_string(), subsector.to_string());
        }
        rec
    }

    #[test]
    fn records_sort_by_sector_subsector_then_name() {
        let mut recs = vec![
            record("Zeta", "Technology", "Software"),
            record("Alpha", "Technology", "Software"),
            record("Beta", "Technology", "Hardware"),
            record("Gamma", "Basic Materials", "Chemicals"),
            record("Delta", "", ""),
            record("alpha", "Technology", "Software"),
        ];
        sort_records(&mut recs);
        let names = recs.iter().map(|r| r.name.as_str()).collect::<Vec<_>>();
        assert_eq!(
            names,
            vec!["Delta", "Gamma", "Beta", "Alpha", "Zeta", "alpha"]
        );
    }

    #[test]
    fn csv_uses_semicolons_and_fixed_columns() {
        let mut rec = record("BASF SE", "Basic Materials", "Chemicals");
        rec.isin = "DE000BASF111".to_string();
        rec.symbol = "BAS".to_string();
        rec.kind = "Common stock".to_string();
        rec.master.insert("form".to_string(), "Registered".to_string());
        rec.master.insert("market".to_string(), "Regulated Market".to_string());
        rec.master.insert("industry".to_string(), "Chemicals; Diversified".to_string());

        let mut out = Vec::new();
        write_csv(&mut out, &[rec]).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Name;ISIN;Symbol;Type;Form;Market;Subsector;Sector;Industry\n\
             BASF SE;DE000BASF111;BAS;Common stock;Registered;Regulated Market;Chemicals;Basic Materials;\"Chemicals; Diversified\"\n"
        );
    }

    #[test]
    fn empty_master_exports_empty_fields() {
        let mut rec = SecRecord::new("https://www.boerse-frankfurt.de/equity/x");
        rec.name = "X".to_string();
        rec.isin = "I".to_string();
        rec.symbol = "S".to_string();
        rec.kind = "T".to_string();

        let mut out = Vec::new();
        write_csv(&mut out, &[rec]).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().nth(1), Some("X;I;S;T;;;;;"));
    }

    #[test]
    fn json_export_maps_the_same_columns() {
        let rec = record("SAP SE", "Technology", "Software");
        let mut out = Vec::new();
        write_json(&mut out, &[rec]).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(
            value,
            serde_json::json!([{
                "name": "SAP SE",
                "isin": "",
                "symbol": "",
                "type": "",
                "form": "",
                "market": "",
                "subsector": "Software",
                "sector": "Technology",
                "industry": ""
            }])
        );
    }

    #[test]
    fn link_lists_skip_blanks_and_comments() {
        let input = "# europe\nhttps://a.example/equity/a\n\n   \n  https://a.example/equity/b  \n#https://a.example/equity/c\n";
        assert_eq!(
            read_links(input.as_bytes()).unwrap(),
            vec!["https://a.example/equity/a", "https://a.example/equity/b"]
        );
    }

    #[test]
    fn link_files_are_merged_without_repeats() {
        let dir = tempfile::tempdir().unwrap();
        let eu = dir.path().join("eu.txt");
        let us = dir.path().join("us.txt");
        fs::write(&eu, "https://x/equity/b\nhttps://x/equity/a\n").unwrap();
        fs::write(&us, "https://x/equity/a\nhttps://x/equity/c\n").unwrap();

        let links = read_link_files(&[eu, us]).unwrap();
        assert_eq!(
            links,
            vec!["https://x/equity/b", "https://x/equity/a", "https://x/equity/c"]
        );
    }

    #[test]
    fn write_links_emits_one_per_line() {
        let links = ["https://x/equity/b", "https://x/equity/a"]
            .into_iter()
            .map(String::from)
            .collect::<BTreeSet<_>>();
        let mut out = Vec::new();
        write_links(&mut out, &links).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "https://x/equity/a\nhttps://x/equity/b\n"
        );
    }

    #[test]
    fn output_guard_requires_force_for_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("eu.csv");
        assert!(check_output_path(&out, false).is_ok());

        fs::write(&out, "old").unwrap();
        let err = check_output_path(&out, false).unwrap_err();
        assert!(err.to_string().contains("--force"));
        assert!(check_output_path(&out, true).is_ok());
        assert!(check_output_path(dir.path(), true).is_err());
    }

    #[test]
    fn forced_output_truncates_and_exclusive_output_refuses() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("eu.txt");
        fs::write(&out, "previous contents that are longer").unwrap();

        assert!(open_output(Some(out.as_path()), false).is_err());

        let mut writer = open_output(Some(out.as_path()), true).unwrap();
        writer.write_all(b"new\n").unwrap();
        writer.flush().unwrap();
        drop(writer);
        assert_eq!(fs::read_to_string(&out).unwrap(), "new\n");
    }

    #[test]
    fn missing_input_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = check_input_files(&[dir.path().join("nope.txt")]).unwrap_err();
        assert!(err.to_string().starts_with("file not exist"));
        assert!(check_input_files(&[dir.path().to_path_buf()]).is_err());
    }
}
