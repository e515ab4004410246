//! End to end searches : catalogues are built from fasta files in a temporary directory, the gateway
//! is configured from a yaml file pointing at them.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::json;

use genogate::dna::kmerindex::{build_catalogue, IndexBuildParams};
use genogate::engine::KmerSetOpener;
use genogate::gateway::{Gateway, GatewayErrorKind, SearchRequest};
use genogate::utils::parameters::{ConfigSource, ConfigStore};

const TEST_SEQ : &str = "CATTTAACGCAACCTATGCAGTGTTTTTCTTCAATTAAGGCAAGTCGAGGCACTATGTATTTATCTGTTTTTTTGTATAGAGGTTTTATGTCTACACCCACATTCAACGACAATGCCTTTATAGTTTCATCGCCGCCCGGTAAGCAGCGGTTTATCTCTGCTGAATGATTTGCTATAGCT";

fn log_init_test() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// writes genomes in dir/catalogue and builds the catalogue, returns the manifest path
fn make_catalogue(dir : &Path, catalogue : &str, genomes : &[(&str, &str)]) -> PathBuf {
    let genomes_dir = dir.join(catalogue);
    std::fs::create_dir_all(&genomes_dir).unwrap();
    for (name, seq) in genomes {
        std::fs::write(genomes_dir.join(format!("{}.fna", name)), format!(">{}\n{}\n", name, seq)).unwrap();
    }
    let params = IndexBuildParams::new(&genomes_dir, dir.join(catalogue));
    build_catalogue(&params).unwrap()
}

fn gateway(config_path : &Path) -> Gateway {
    let store = ConfigStore::open(ConfigSource::new(Some(config_path.to_path_buf()))).unwrap();
    Gateway::new(Arc::new(store), Arc::new(KmerSetOpener))
}

#[test]
fn derived_count_search() {
    log_init_test();
    let dir = tempfile::tempdir().unwrap();
    let marine = make_catalogue(dir.path(), "marine1.0", &[("MGYG000296002", TEST_SEQ)]);
    let config_path = dir.path().join("genogate.yaml");
    std::fs::write(&config_path, format!("min_len: 50\nmax_len: 5000\nindices:\n  marine1.0: {}\n", marine.display())).unwrap();
    let gateway = gateway(&config_path);
    //
    let response = gateway.search(&SearchRequest::new(TEST_SEQ).catalogues(&["marine1.0"])).unwrap();
    let value = serde_json::to_value(&response).unwrap();
    assert_eq!(
        value,
        json!({
            "query": TEST_SEQ,
            "threshold": 0.4,
            "results": [{"genome": "MGYG000296002", "num_kmers": 150, "num_kmers_found": 150, "percent_kmers_found": 100.0}]
        })
    );
    // unknown catalogue in the filter fails the whole request
    let err = gateway.search(&SearchRequest::new(TEST_SEQ).catalogues(&["badcatalogue0.0", "marine1.0"])).unwrap_err();
    assert_eq!(err.get_kind(), GatewayErrorKind::UnknownCatalogue);
    assert_eq!(err.get_field(), "catalogue_filter");
    // no filter : all catalogues
    let response = gateway.search(&SearchRequest::new(&format!(">query\n{}\n", TEST_SEQ))).unwrap();
    assert_eq!(response.get_results().len(), 1);
}

#[test]
fn clear_cache_serves_new_catalogues() {
    log_init_test();
    let dir = tempfile::tempdir().unwrap();
    let marine = make_catalogue(dir.path(), "marine1.0", &[("MGYG000296002", TEST_SEQ)]);
    let gut = make_catalogue(dir.path(), "gut1.0", &[("MGYG000000001", &"A".repeat(200)), ("MGYG000000002", &TEST_SEQ[0..120])]);
    let config_path = dir.path().join("genogate.yaml");
    std::fs::write(&config_path, format!("min_len: 50\nmax_len: 5000\nindices:\n  marine1.0: {}\n", marine.display())).unwrap();
    let gateway = gateway(&config_path);
    assert!(gateway.search(&SearchRequest::new(TEST_SEQ).catalogues(&["gut1.0"])).is_err());
    //
    std::fs::write(
        &config_path,
        format!("min_len: 50\nmax_len: 5000\nindices:\n  marine1.0: {}\n  gut1.0: {}\n", marine.display(), gut.display()),
    )
    .unwrap();
    // still cached
    assert!(gateway.search(&SearchRequest::new(TEST_SEQ).catalogues(&["gut1.0"])).is_err());
    gateway.clear_cache().unwrap();
    gateway.clear_cache().unwrap();
    //
    let response = gateway.search(&SearchRequest::new(TEST_SEQ).catalogues(&["gut1.0"])).unwrap();
    assert_eq!(response.get_results().len(), 1);
    let hit = response.get_results()[0].get_hit();
    assert_eq!(hit.get_genome(), "MGYG000000002");
    // 120 nt prefix : 90 of the 150 k-mers
    assert_eq!(hit.get_num_kmers_found(), 90);
    assert_eq!(hit.get_percent_kmers_found(), 60.0);
    // both catalogues, in catalogue order
    let response = gateway.search(&SearchRequest::new(TEST_SEQ)).unwrap();
    let genomes : Vec<&str> = response.get_results().iter().map(|r| r.get_hit().get_genome()).collect();
    assert_eq!(genomes, vec!["MGYG000000002", "MGYG000296002"]);
    // a threshold above 0.6 drops the partial hit
    let response = gateway.search(&SearchRequest::new(TEST_SEQ).threshold(0.7)).unwrap();
    assert_eq!(response.get_results().len(), 1);
    // a broken config keeps the current one in service
    std::fs::write(&config_path, "indices: [").unwrap();
    assert!(gateway.clear_cache().is_err());
    assert!(gateway.search(&SearchRequest::new(TEST_SEQ).catalogues(&["gut1.0"])).is_ok());
}

#[test]
fn score_ranked_search_with_metadata() {
    log_init_test();
    let dir = tempfile::tempdir().unwrap();
    let all = make_catalogue(
        dir.path(),
        "all",
        &[("MGYG000296002", TEST_SEQ), ("MGYG000000002", &TEST_SEQ[0..120]), ("MGYG000000003", &TEST_SEQ[60..180])],
    );
    let store_path = dir.path().join("mgnify.jsonl");
    let records = [
        json!({"id": "MGYG000296002", "type": "genomes", "relationships": {"catalogue": {"data": {"id": "marine1.0"}}}}),
        json!({"id": "MGYG000000002", "type": "genomes", "relationships": {"catalogue": {"data": {"id": "gut1.0"}}}}),
    ];
    let lines : Vec<String> = records.iter().map(|r| r.to_string()).collect();
    std::fs::write(&store_path, lines.join("\n")).unwrap();
    //
    let config_path = dir.path().join("genogate.yaml");
    std::fs::write(
        &config_path,
        format!(
            "min_len: 50\nmax_len: 5000\npipeline: score_ranked\nalphabet: iupac\nmetadata_store: {}\nindices:\n  all:\n    path: {}\n    kmer_size: 31\n    flavour: scored\n",
            store_path.display(),
            all.display()
        ),
    )
    .unwrap();
    let gateway = gateway(&config_path);
    //
    let response = gateway.search(&SearchRequest::new(TEST_SEQ).score(true)).unwrap();
    let value = serde_json::to_value(&response).unwrap();
    let results = value["results"].as_array().unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results[0]["bigsi"]["genome"], json!("MGYG000296002"));
    assert_eq!(results[0]["bigsi"]["percent_kmers_found"], json!(100.0));
    assert_eq!(results[0]["bigsi"]["score"], json!(1.0));
    assert_eq!(results[0]["mgnify"]["relationships"]["catalogue"]["data"]["id"], json!("marine1.0"));
    // no metadata for the third genome
    assert_eq!(results[2]["bigsi"]["genome"], json!("MGYG000000003"));
    assert_eq!(results[2]["mgnify"], json!({}));
    //
    // scores only on request
    let response = gateway.search(&SearchRequest::new(TEST_SEQ)).unwrap();
    let value = serde_json::to_value(&response).unwrap();
    assert!(value["results"][0]["bigsi"].get("score").is_none());
    // ambiguous bases are skipped by the scored engine
    let ambiguous = format!("{}N{}", &TEST_SEQ[0..90], &TEST_SEQ[91..180]);
    let response = gateway.search(&SearchRequest::new(&ambiguous)).unwrap();
    assert!(!response.get_results().is_empty());
}

#[test]
fn concurrent_first_searches() {
    log_init_test();
    let dir = tempfile::tempdir().unwrap();
    let mut yaml = String::from("min_len: 50\nmax_len: 5000\nindices:\n");
    for i in 0..6 {
        let catalogue = format!("cat{}.0", i);
        let genomes : Vec<(String, String)> =
            (0..8).map(|g| (format!("MGYG{}{:02}", i, g), TEST_SEQ[g * 5..120 + g * 5].to_string())).collect();
        let genomes : Vec<(&str, &str)> = genomes.iter().map(|(n, s)| (n.as_str(), s.as_str())).collect();
        let manifest = make_catalogue(dir.path(), &catalogue, &genomes);
        yaml.push_str(&format!("  {}: {}\n", catalogue, manifest.display()));
    }
    let config_path = dir.path().join("genogate.yaml");
    std::fs::write(&config_path, yaml).unwrap();
    let gateway = Arc::new(gateway(&config_path));
    //
    let (sender, receiver) = std::sync::mpsc::channel::<usize>();
    let nb_threads = 16;
    for _ in 0..nb_threads {
        let gateway = gateway.clone();
        let sender = sender.clone();
        std::thread::spawn(move || {
            let nb_results = gateway.search(&SearchRequest::new(TEST_SEQ)).map(|r| r.get_results().len()).unwrap_or(0);
            let _ = sender.send(nb_results);
        });
    }
    for _ in 0..nb_threads {
        let nb_results = receiver.recv_timeout(std::time::Duration::from_secs(120)).expect("search did not complete");
        assert_eq!(nb_results, 48);
    }
    assert_eq!(gateway.get_registry().snapshot().opened().len(), 6);
}
