use crate::cli::{print_json, IngestArgs, OutputFormat, ScanArgs};
use crate::config::StitcherFileConfig;
use anyhow::{bail, Context, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use stitcher_core::ingest::channel;
use stitcher_core::jobs::param;
use stitcher_core::{
    IngestReport, JobKind, JobOutput, JobParams, MappingSpec, ProgressEvent, SourceInput, Stitcher,
};

fn load_mapping(path: Option<&Path>) -> Result<MappingSpec> {
    match path {
        Some(p) => {
            let text = std::fs::read_to_string(p)
                .with_context(|| format!("reading mapping {}", p.display()))?;
            toml::from_str(&text).with_context(|| format!("parsing mapping {}", p.display()))
        }
        None => Ok(MappingSpec::new()),
    }
}

fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Fetch a URL into `dir`, named after its last path segment.
fn download(url: &str, dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let name = url
        .split(['?', '#'])
        .next()
        .and_then(|u| u.rsplit('/').find(|s| !s.is_empty()))
        .filter(|s| !s.contains(':'))
        .unwrap_or("download");
    let path = dir.join(name);

    tracing::info!(url, path = %path.display(), "downloading");
    let response = reqwest::blocking::get(url)
        .and_then(|r| r.error_for_status())
        .with_context(|| format!("fetching {}", url))?;
    let bytes = response.bytes().with_context(|| format!("reading body of {}", url))?;
    std::fs::write(&path, &bytes).with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

fn job_params(args: &IngestArgs, mapping: &MappingSpec, file: &Path, url: Option<&str>) -> Result<JobParams> {
    let mut params = JobParams::new()
        .with(param::FILE, file.to_string_lossy())
        .with(param::MAPPING, serde_json::to_string(mapping)?);
    if let Some(url) = url {
        params.insert(param::URL, url);
    }
    if let Some(name) = &args.name {
        params.insert(param::NAME, name.as_str());
    }
    if let Some(format) = &args.input_format {
        params.insert(param::FORMAT, format.as_str());
    }
    if let Some(delimiter) = &args.delimiter {
        params.insert(param::DELIMITER, delimiter.as_str());
    }
    if let Some(id) = &args.id {
        params.insert(param::ID, id.as_str());
    }
    for pair in &args.keys {
        let Some((key, fields)) = pair.split_once('=') else {
            bail!("--key expects KEY=FIELDS, got {:?}", pair);
        };
        params.insert(key.trim(), fields.trim());
    }
    Ok(params)
}

pub fn run(args: IngestArgs, stitcher: Stitcher, config: &StitcherFileConfig, format: OutputFormat) -> Result<()> {
    let mapping = load_mapping(args.mapping.as_deref())?;
    if args.name.is_some() && args.inputs.len() > 1 {
        bail!("--name applies to a single input");
    }

    let (stitcher, printer) = if config.jobs.show_progress {
        let (sink, rx) = channel(config.ingest.progress_capacity);
        let printer = std::thread::spawn(move || {
            for event in rx.iter() {
                match event {
                    ProgressEvent::EntityAdded { source, entity, ordinal } => {
                        eprintln!("  {} #{} -> entity {}", source, ordinal, entity)
                    }
                    ProgressEvent::Error { source, ordinal, message } => eprintln!(
                        "  error {}{}: {}",
                        source.as_deref().unwrap_or("-"),
                        ordinal.map(|o| format!(" #{}", o)).unwrap_or_default(),
                        message
                    ),
                }
            }
        });
        (stitcher.with_progress(sink), Some(printer))
    } else {
        (stitcher, None)
    };

    let mut pending = Vec::new();
    for input in &args.inputs {
        let (file, url) = if is_url(input) {
            (download(input, &config.download_dir())?, Some(input.as_str()))
        } else {
            (PathBuf::from(input), None)
        };
        pending.push((input.clone(), job_params(&args, &mapping, &file, url)?));
    }
    let pending = distinct_jobs(pending);

    let mut jobs = Vec::new();
    for (input, params) in pending {
        let fingerprint = stitcher.submit(JobKind::Ingest, params)?;
        tracing::info!(input = %input, job = %fingerprint, "submitted");
        jobs.push((input, fingerprint));
    }

    let poll = Duration::from_millis(config.jobs.poll_interval_ms);
    loop {
        let running = stitcher.running();
        if running.is_empty() {
            break;
        }
        for job in &running {
            tracing::info!(
                job = %job.fingerprint,
                added = job.counters.count,
                errors = job.counters.error,
                "ingesting"
            );
        }
        std::thread::sleep(poll);
    }

    let mut reports = Vec::new();
    let mut failed = 0;
    for (input, fingerprint) in &jobs {
        match stitcher.wait(fingerprint) {
            Ok(JobOutput::Ingest(report)) => reports.push(report),
            Ok(other) => tracing::warn!(input = %input, ?other, "unexpected job output"),
            Err(e) => {
                failed += 1;
                eprintln!("{}: {}", input, e);
            }
        }
    }

    // Dropping the stitcher closes the progress channel.
    drop(stitcher);
    if let Some(printer) = printer {
        let _ = printer.join();
    }

    if format == OutputFormat::Json {
        print_json(&reports)?;
    } else {
        for report in &reports {
            print_report(report);
        }
    }
    if failed > 0 {
        bail!("{} of {} inputs failed", failed, jobs.len());
    }
    Ok(())
}

/// Keep the first input per ingest job fingerprint, so each job is
/// submitted and awaited once.
fn distinct_jobs(jobs: Vec<(String, JobParams)>) -> Vec<(String, JobParams)> {
    let mut seen = HashSet::new();
    jobs.into_iter()
        .filter(|(input, params)| {
            let fresh = seen.insert(params.fingerprint(JobKind::Ingest));
            if !fresh {
                tracing::info!(input = %input, "same job as an earlier input, skipped");
            }
            fresh
        })
        .collect()
}

fn print_report(report: &IngestReport) {
    let ds = &report.datasource;
    if report.created {
        println!(
            "{} ({}): {} entities, {} edges, {} record errors",
            ds.name, ds.key, report.entities_added, report.edges_added, report.record_errors
        );
    } else {
        println!("{} ({}): already ingested, {} instances", ds.name, ds.key, ds.instances);
    }
}

pub fn scan(args: ScanArgs, stitcher: &Stitcher, format: OutputFormat) -> Result<()> {
    let mut mapping = load_mapping(args.mapping.as_deref())?;
    if let Some(f) = &args.input_format {
        mapping.format = f.parse()?;
    }
    let mut overrides = std::collections::BTreeMap::new();
    if let Some(d) = &args.delimiter {
        overrides.insert(param::DELIMITER.to_string(), d.clone());
    }
    mapping.apply_params(&overrides)?;

    let input = SourceInput::path(&args.file);
    let schema = match args.limit {
        Some(limit) => stitcher_core::ingest::scan_source(&input, &mapping, limit)?,
        None => stitcher.scan(&input, &mapping)?,
    };

    if format == OutputFormat::Json {
        return print_json(&schema);
    }
    println!("{} records scanned, {} malformed", schema.records, schema.malformed);
    println!("{:<32}  {:<8}  {:>8}", "FIELD", "TYPE", "COUNT");
    println!("{}", "─".repeat(52));
    for field in &schema.fields {
        println!("{:<32}  {:<8}  {:>8}", field.name, format!("{:?}", field.field_type), field.count);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(keys: &[&str]) -> IngestArgs {
        IngestArgs {
            inputs: vec!["agents.tsv".into()],
            mapping: None,
            input_format: Some("tsv".into()),
            delimiter: None,
            name: Some("agents".into()),
            id: Some("ID".into()),
            keys: keys.iter().map(|k| k.to_string()).collect(),
        }
    }

    #[test]
    fn test_job_params_carry_overrides() {
        let params = job_params(
            &args(&["I_CAS=CAS", "N_Name=NAME,SYNONYMS"]),
            &MappingSpec::new(),
            Path::new("agents.tsv"),
            None,
        )
        .unwrap();
        assert_eq!(params.get(param::FILE), Some("agents.tsv"));
        assert_eq!(params.get(param::ID), Some("ID"));
        assert_eq!(params.get("N_Name"), Some("NAME,SYNONYMS"));
        assert!(params.get(param::URL).is_none());

        let mut spec: MappingSpec = serde_json::from_str(params.require(param::MAPPING).unwrap()).unwrap();
        spec.apply_params(params.as_map()).unwrap();
        assert_eq!(spec.stitches.len(), 3);
        assert_eq!(spec.name.as_deref(), Some("agents"));
    }

    #[test]
    fn test_bad_key_pair_rejected() {
        let result = job_params(&args(&["I_CAS"]), &MappingSpec::new(), Path::new("a.tsv"), None);
        assert!(result.is_err());
    }

    #[test]
    fn test_repeated_input_is_one_job() {
        let a = job_params(&args(&["I_CAS=CAS"]), &MappingSpec::new(), Path::new("a.tsv"), None).unwrap();
        let b = job_params(&args(&["I_CAS=CAS"]), &MappingSpec::new(), Path::new("b.tsv"), None).unwrap();
        let jobs = vec![
            ("a.tsv".to_string(), a.clone()),
            ("b.tsv".to_string(), b),
            ("again/a.tsv".to_string(), a),
        ];
        let distinct = distinct_jobs(jobs);
        assert_eq!(distinct.len(), 2);
        assert_eq!(distinct[0].0, "a.tsv");
        assert_eq!(distinct[1].0, "b.tsv");
    }

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.org/data.tsv"));
        assert!(!is_url("data/https.tsv"));
    }
}
