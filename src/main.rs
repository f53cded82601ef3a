use clap::{Arg, ArgAction, Command};
use inbox_triage::classifier::ClassifierModel;
use inbox_triage::dataset::{insight, load_corpus, DatasetProcessor};
use inbox_triage::features::FeatureExtractor;
use inbox_triage::{
    load_config_or_default, Category, EngineConfig, Message, Rule, RuleStore, TriageEngine,
};
use log::LevelFilter;
use std::process;

fn main() {
    let matches = Command::new("inbox-triage")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Spam, ham and notice triage for university mailboxes")
        .long_about(
            "inbox-triage trains a naive Bayes classifier on a labeled mail corpus and \
             combines its verdicts with per-user whitelist, blacklist and keyword rules \
             into a priority level for every message.",
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("/etc/inbox-triage.yaml"),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .value_name("FILE")
                .help("Generate a default configuration file")
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("test-config")
                .long("test-config")
                .help("Test configuration validity")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("train")
                .long("train")
                .value_name("CORPUS")
                .help("Train a model and save it to the configured model path (defaults to paths.corpus_path)")
                .num_args(0..=1)
                .default_missing_value(""),
        )
        .arg(
            Arg::new("corpus-stats")
                .long("corpus-stats")
                .value_name("CORPUS")
                .help("Show label distribution, skipped records and frequent terms of a corpus")
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("classify")
                .long("classify")
                .value_name("MESSAGE")
                .help("Classify a JSON message (or an array of messages) with the saved model")
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("rules")
                .long("rules")
                .value_name("FILE")
                .help("YAML list of user rules applied by --classify (defaults to paths.rules_path)")
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("user")
                .long("user")
                .value_name("USER")
                .help("User whose rules apply to --classify (defaults to the only owner in the rules file)")
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("model-info")
                .long("model-info")
                .help("Show metadata and top terms of the saved model")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    // Initialize logger based on verbose flag
    let log_level = if matches.get_flag("verbose") {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    if let Some(generate_path) = matches.get_one::<String>("generate-config") {
        generate_default_config(generate_path);
        return;
    }

    let config_path = matches
        .get_one::<String>("config")
        .map(String::as_str)
        .unwrap_or("/etc/inbox-triage.yaml");

    let config = match load_config_or_default(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e:#}");
            process::exit(1);
        }
    };

    if matches.get_flag("test-config") {
        test_config(&config);
        return;
    }

    if let Some(corpus) = matches.get_one::<String>("corpus-stats") {
        corpus_stats(&config, corpus);
        return;
    }

    if let Some(corpus) = matches.get_one::<String>("train") {
        let corpus = if corpus.is_empty() {
            match config.paths.corpus_path.as_deref() {
                Some(path) => path,
                None => {
                    eprintln!("❌ No corpus given and paths.corpus_path is not configured");
                    process::exit(1);
                }
            }
        } else {
            corpus.as_str()
        };
        train(&config, corpus);
        return;
    }

    if matches.get_flag("model-info") {
        model_info(&config);
        return;
    }

    if let Some(message_file) = matches.get_one::<String>("classify") {
        let rules_file = matches
            .get_one::<String>("rules")
            .map(String::as_str)
            .or(config.paths.rules_path.as_deref());
        let user = matches.get_one::<String>("user").map(String::as_str);
        classify(&config, message_file, rules_file, user);
        return;
    }

    eprintln!("Nothing to do. Run with --help to see the available commands.");
    process::exit(2);
}

fn generate_default_config(path: &str) {
    let config = EngineConfig::default();
    match config.to_file(path) {
        Ok(()) => {
            println!("Default configuration written to: {path}");
            println!("Please edit the configuration file to suit your needs.");
        }
        Err(e) => {
            eprintln!("Error writing configuration file: {e:#}");
            process::exit(1);
        }
    }
}

fn test_config(config: &EngineConfig) {
    println!("🔍 Testing configuration...");
    println!();

    if let Err(e) = config.validate() {
        println!("❌ Configuration validation failed:");
        println!("Error: {e}");
        process::exit(1);
    }

    println!(
        "Tokenizer: min token length {}, {} stop words, subject weight {}, body weight {}",
        config.tokenizer.min_token_length,
        config.tokenizer.stop_words.len(),
        config.tokenizer.subject_weight,
        config.tokenizer.body_weight
    );
    println!(
        "Classifier: smoothing {}, at least {} examples, {} priors",
        config.classifier.smoothing,
        config.classifier.min_training_examples,
        if config.classifier.balance_priors {
            "balanced"
        } else {
            "frequency"
        }
    );
    println!(
        "Priority: confidence threshold {}",
        config.priority.confidence_threshold
    );
    println!("Model path: {}", config.paths.model_path);

    if let Some(rules_path) = config.paths.rules_path.as_deref() {
        match load_rules(rules_path) {
            Ok(store) => println!("Rules: {} user(s) in {rules_path}", store.users().len()),
            Err(e) => {
                println!("❌ Rules file failed to load:");
                println!("Error: {e:#}");
                process::exit(1);
            }
        }
    }
    println!("✅ Configuration is valid");
}

fn corpus_stats(config: &EngineConfig, path: &str) {
    let corpus = match load_corpus(path) {
        Ok(corpus) => corpus,
        Err(e) => {
            eprintln!("❌ Failed to load corpus: {e}");
            process::exit(1);
        }
    };

    let extractor = FeatureExtractor::new(config.tokenizer.clone());
    let processor = DatasetProcessor::new(extractor.clone());
    match processor.load_and_vectorize(&corpus) {
        Ok(vectorized) => {
            print!("{}", vectorized.statistics.summary());
            println!("- Vocabulary size: {}", vectorized.vocabulary.len());
        }
        Err(e) => {
            // the report below still helps to see what is wrong with the corpus
            println!("⚠️  Corpus is not usable for training: {e}");
        }
    }

    println!();
    for category in Category::ALL {
        let keywords = insight::top_keywords(&corpus, &extractor, Some(category), 10);
        if keywords.is_empty() {
            continue;
        }
        let keywords: Vec<String> = keywords
            .into_iter()
            .map(|(term, count)| format!("{term} ({count})"))
            .collect();
        println!("Top {category} keywords: {}", keywords.join(", "));

        let domains = insight::common_sender_domains(&corpus, Some(category), 5);
        if !domains.is_empty() {
            let domains: Vec<String> = domains
                .into_iter()
                .map(|(domain, count)| format!("{domain} ({count})"))
                .collect();
            println!("Common {category} sender domains: {}", domains.join(", "));
        }
    }
}

fn train(config: &EngineConfig, corpus: &str) {
    let engine = TriageEngine::from_config(config);
    let (model, statistics) = match engine.train_from_path(corpus) {
        Ok(trained) => trained,
        Err(e) => {
            eprintln!("❌ Training failed: {e}");
            process::exit(1);
        }
    };

    print!("{}", statistics.summary());
    println!();
    print_model(&model);

    if let Err(e) = engine.save_model(&config.paths.model_path) {
        eprintln!("❌ Failed to save model: {e}");
        process::exit(1);
    }
    println!("✅ Model saved to {}", config.paths.model_path);
}

fn model_info(config: &EngineConfig) {
    let engine = TriageEngine::from_config(config);
    match engine.load_model(&config.paths.model_path) {
        Ok(model) => print_model(&model),
        Err(e) => {
            eprintln!(
                "❌ Failed to load model from {}: {e}",
                config.paths.model_path
            );
            process::exit(1);
        }
    }
}

fn print_model(model: &ClassifierModel) {
    let metadata = model.metadata();
    println!("📊 Model");
    println!("═══════════════════════════════════════");
    println!(
        "  Trained: {}",
        metadata.trained_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!("  Format version: {}", metadata.format_version);
    println!("  Vocabulary: {} terms", metadata.vocabulary_size);
    println!(
        "  Smoothing: {} ({} priors)",
        metadata.smoothing,
        if metadata.balanced_priors {
            "balanced"
        } else {
            "frequency"
        }
    );
    for (category, count) in &metadata.examples_per_category {
        let terms: Vec<String> = model
            .top_terms(*category, 8)
            .into_iter()
            .map(|(term, _)| term)
            .collect();
        println!("  {category}: {count} examples; top terms: {}", terms.join(", "));
    }
}

fn classify(
    config: &EngineConfig,
    message_file: &str,
    rules_file: Option<&str>,
    user: Option<&str>,
) {
    let messages = match read_messages(message_file) {
        Ok(messages) => messages,
        Err(e) => {
            eprintln!("❌ Error reading messages: {e:#}");
            process::exit(1);
        }
    };

    let store = match rules_file.map(load_rules).transpose() {
        Ok(store) => store.unwrap_or_default(),
        Err(e) => {
            eprintln!("❌ Error reading rules: {e:#}");
            process::exit(1);
        }
    };
    let user = match user {
        Some(user) => user.to_string(),
        None => match store.users().as_slice() {
            [] => "default".to_string(),
            [only] => only.clone(),
            _ => {
                eprintln!("❌ Rules file holds several users; pick one with --user");
                process::exit(1);
            }
        },
    };
    let rules = store.snapshot(&user);

    let engine = TriageEngine::from_config(config);
    if let Err(e) = engine.load_model(&config.paths.model_path) {
        eprintln!("❌ Failed to load model: {e}");
        process::exit(1);
    }

    println!(
        "🧪 Classifying {} message(s) for {user} ({} rules)",
        messages.len(),
        rules.len()
    );
    println!();
    for (message, result) in messages.iter().zip(engine.classify_batch(&messages, &rules)) {
        println!("📧 {} from {}", message.id, message.sender);
        println!("   Subject: {}", truncate_string(&message.subject, 70));
        match result {
            Ok(decision) => {
                println!(
                    "   → {} at priority {} (confidence {:.2})",
                    decision.category, decision.priority_level, decision.confidence
                );
                for reason in &decision.rationale {
                    println!("     • {reason}");
                }
            }
            Err(e) => println!("   ❌ {e}"),
        }
        println!();
    }
    print!("{}", engine.statistics().snapshot().summary());
}

fn read_messages(path: &str) -> anyhow::Result<Vec<Message>> {
    use anyhow::Context;

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read message file: {path}"))?;
    let value: serde_json::Value = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse message file: {path}"))?;
    let messages = if value.is_array() {
        serde_json::from_value(value)?
    } else {
        vec![serde_json::from_value(value)?]
    };
    Ok(messages)
}

fn load_rules(path: &str) -> anyhow::Result<RuleStore> {
    use anyhow::Context;

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read rules file: {path}"))?;
    let rules: Vec<Rule> = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse rules file: {path}"))?;

    let store = RuleStore::new();
    for rule in rules {
        let description = rule.to_string();
        store
            .add_rule(rule)
            .with_context(|| format!("Rule {description} in {path} rejected"))?;
    }
    Ok(store)
}

fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}
