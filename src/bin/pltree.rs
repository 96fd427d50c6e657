use clap::value_t;
use log::info;
use pltree::base::{LossType, Optimizer};
use pltree::data::ReaderState;
use pltree::model::{eval, HyperParam, ModelType};
use pltree::tree::TreeType;
use pltree::vector::Representation;
use pltree::{DataSet, Model};
use std::io::{BufWriter, Write};
use std::path::Path;

fn set_num_threads(matches: &clap::ArgMatches) {
    rayon::ThreadPoolBuilder::new()
        .num_threads(value_t!(matches, "threads", usize).unwrap())
        .build_global()
        .unwrap();
}

fn parse_representation(matches: &clap::ArgMatches) -> Representation {
    match matches.value_of("load_as").unwrap() {
        "dense" => Representation::Dense,
        "map" => Representation::Map,
        "sparse" => Representation::Sparse,
        _ => unreachable!(),
    }
}

fn parse_hyper_param(matches: &clap::ArgMatches) -> HyperParam {
    let mut hyper = HyperParam::default();

    hyper.model_type = match matches.value_of("model_type").unwrap() {
        "plt" => ModelType::Plt,
        "hsm" => ModelType::Hsm,
        _ => unreachable!(),
    };
    hyper.tree_type = match matches.value_of("tree_type").unwrap() {
        "complete_in_order" => TreeType::CompleteInOrder,
        "complete_random" => TreeType::CompleteRandom,
        _ => unreachable!(),
    };
    hyper.arity = value_t!(matches, "arity", usize).unwrap();
    hyper.tree_structure = matches.value_of("tree_structure").map(String::from);
    hyper.save_grads = matches.occurrences_of("save_grads") > 0;

    hyper.base.optimizer = match matches.value_of("optimizer").unwrap() {
        "liblinear" => Optimizer::Liblinear,
        "sgd" => Optimizer::Sgd,
        "adagrad" => Optimizer::Adagrad,
        _ => unreachable!(),
    };
    hyper.base.loss_type = match matches.value_of("loss").unwrap() {
        "logistic" => LossType::Logistic,
        "squared_hinge" => LossType::SquaredHinge,
        "pw_logistic" => LossType::PwLogistic,
        _ => unreachable!(),
    };
    hyper.base.epochs = value_t!(matches, "epochs", u32).unwrap();
    hyper.base.eta = value_t!(matches, "eta", f64).unwrap();
    hyper.base.adagrad_eps = value_t!(matches, "adagrad_eps", f64).unwrap();
    hyper.base.tmax = value_t!(matches, "tmax", i64).unwrap();
    hyper.base.cost = value_t!(matches, "cost", f64).unwrap();
    hyper.base.auto_c_log = matches.occurrences_of("auto_c_log") > 0;
    hyper.base.auto_c_lin = matches.occurrences_of("auto_c_lin") > 0;
    hyper.base.eps = value_t!(matches, "eps", f64).unwrap();
    hyper.base.max_iter = value_t!(matches, "max_iter", u32).unwrap();
    hyper.base.weights_threshold = value_t!(matches, "weights_threshold", f64).unwrap();
    hyper.base.inbalance_labels_weighting =
        matches.occurrences_of("inbalance_labels_weighting") > 0;

    hyper.validate().expect("Invalid hyper-parameter settings");
    hyper
}

fn train(matches: &clap::ArgMatches) {
    set_num_threads(matches);
    let hyper = parse_hyper_param(matches);
    info!("Training with {:?}", hyper);

    let dataset = {
        let path = matches.value_of("training_data").unwrap();
        DataSet::load_xc_repo_data_file(path).expect("Failed to load training data")
    };

    let model_path = matches.value_of("model_path").unwrap();
    hyper
        .train(&dataset, model_path)
        .expect("Failed to train model");
}

fn load_model(matches: &clap::ArgMatches) -> (Model, ReaderState) {
    let model_path = Path::new(matches.value_of("model_path").unwrap());

    let hyper =
        HyperParam::load_from_file(model_path.join("args.bin")).expect("Failed to load settings");
    info!("Model was trained with {:?}", hyper);

    let state = ReaderState::load_from_file(model_path.join("data_reader.bin"))
        .expect("Failed to load reader state");
    let model =
        Model::load(model_path, parse_representation(matches)).expect("Failed to load model");
    (model, state)
}

fn test(matches: &clap::ArgMatches) {
    set_num_threads(matches);
    let (model, state) = load_model(matches);

    let dataset = {
        let path = matches.value_of("test_data").unwrap();
        DataSet::load_xc_repo_data_file(path).expect("Failed to load test data")
    };
    state.check(&dataset);

    let top_k = value_t!(matches, "top_k", usize).unwrap();
    eval::test_all(&model, &dataset, top_k);
}

fn trim_trailing_zeros(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

/// Render a value at precision 5 in the C++ default float field: five
/// significant digits, trailing zeros trimmed, scientific notation outside
/// the fixed-point range.
fn format_probability(value: f64) -> String {
    if value == 0. {
        return "0".to_string();
    }

    // Round to five significant digits first; the rounded exponent decides
    // between fixed-point and scientific rendering.
    let scientific = format!("{:.4e}", value);
    let e_pos = scientific.find('e').unwrap();
    let exponent: i32 = scientific[e_pos + 1..].parse().unwrap();

    if exponent < -4 || exponent >= 5 {
        format!(
            "{}e{}{:02}",
            trim_trailing_zeros(&scientific[..e_pos]),
            if exponent < 0 { '-' } else { '+' },
            exponent.abs()
        )
    } else {
        trim_trailing_zeros(&format!("{:.*}", (4 - exponent).max(0) as usize, value)).to_string()
    }
}

fn predict(matches: &clap::ArgMatches) {
    set_num_threads(matches);
    let (model, state) = load_model(matches);

    let dataset = {
        let path = matches.value_of("data").unwrap();
        DataSet::load_xc_repo_data_file(path).expect("Failed to load data")
    };
    state.check(&dataset);

    let top_k = value_t!(matches, "top_k", usize).unwrap();
    let stdout = std::io::stdout();
    let mut writer = BufWriter::new(stdout.lock());
    for example in &dataset.examples {
        match example.labels.first() {
            Some(label) => write!(&mut writer, "{}", label).unwrap(),
            None => write!(&mut writer, "-1").unwrap(),
        }
        for (label, probability) in model.predict(&example.features, top_k) {
            write!(&mut writer, " {}:{}", label, format_probability(probability)).unwrap();
        }
        writeln!(&mut writer).unwrap();
    }
}

fn main() {
    simple_logger::init().unwrap();

    let default_hyper = HyperParam::default();
    let default_arity = default_hyper.arity.to_string();
    let default_epochs = default_hyper.base.epochs.to_string();
    let default_eta = default_hyper.base.eta.to_string();
    let default_adagrad_eps = default_hyper.base.adagrad_eps.to_string();
    let default_tmax = default_hyper.base.tmax.to_string();
    let default_cost = default_hyper.base.cost.to_string();
    let default_eps = default_hyper.base.eps.to_string();
    let default_max_iter = default_hyper.base.max_iter.to_string();
    let default_weights_threshold = default_hyper.base.weights_threshold.to_string();

    let threads_arg = clap::Arg::with_name("threads")
        .long("threads")
        .help("Number of worker threads. If 0, the number is selected automatically")
        .takes_value(true)
        .value_name("T")
        .default_value("0");
    let top_k_arg = clap::Arg::with_name("top_k")
        .long("top_k")
        .help("Number of top predictions per example")
        .takes_value(true)
        .value_name("K")
        .default_value("5");
    let load_as_arg = clap::Arg::with_name("load_as")
        .long("load_as")
        .help("Representation used for loaded weight vectors")
        .takes_value(true)
        .value_name("REPR")
        .default_value("sparse")
        .possible_values(&["dense", "map", "sparse"]);

    let arg_matches = clap::App::new("pltree")
        .about(
            "pltree: Probabilistic Label Trees with hierarchical softmax \
             for extreme multi-label classification",
        )
        .subcommand(
            clap::SubCommand::with_name("train")
                .about("Train a new model")
                .arg(
                    clap::Arg::with_name("training_data")
                        .index(1)
                        .help("Path to training dataset file (in the format of the Extreme Classification Repository)")
                        .required(true)
                        .value_name("TRAINING_DATA_PATH"),
                )
                .arg(
                    clap::Arg::with_name("model_path")
                        .index(2)
                        .help("Path of the directory where the trained model will be saved")
                        .required(true)
                        .value_name("MODEL_PATH"),
                )
                .arg(threads_arg.clone())
                .arg(
                    clap::Arg::with_name("model_type")
                        .long("model_type")
                        .help("Probabilistic label tree or hierarchical softmax (single-label)")
                        .takes_value(true)
                        .value_name("TYPE")
                        .default_value("plt")
                        .possible_values(&["plt", "hsm"]),
                )
                .arg(
                    clap::Arg::with_name("tree_type")
                        .long("tree_type")
                        .help("How leaves of the complete tree are assigned to labels")
                        .takes_value(true)
                        .value_name("TYPE")
                        .default_value("complete_in_order")
                        .possible_values(&["complete_in_order", "complete_random"]),
                )
                .arg(
                    clap::Arg::with_name("arity")
                        .long("arity")
                        .help("Maximum number of children per internal tree node")
                        .takes_value(true)
                        .value_name("A")
                        .default_value(&default_arity),
                )
                .arg(
                    clap::Arg::with_name("tree_structure")
                        .long("tree_structure")
                        .help("Path to a tree structure file; overrides tree_type and arity")
                        .takes_value(true)
                        .value_name("PATH"),
                )
                .arg(
                    clap::Arg::with_name("optimizer")
                        .long("optimizer")
                        .help("Optimizer used for training node classifiers")
                        .takes_value(true)
                        .value_name("OPT")
                        .default_value("liblinear")
                        .possible_values(&["liblinear", "sgd", "adagrad"]),
                )
                .arg(
                    clap::Arg::with_name("loss")
                        .long("loss")
                        .help("Loss function of node classifiers")
                        .takes_value(true)
                        .value_name("LOSS")
                        .default_value("logistic")
                        .possible_values(&["logistic", "squared_hinge", "pw_logistic"]),
                )
                .arg(
                    clap::Arg::with_name("epochs")
                        .long("epochs")
                        .help("Number of passes over each node's examples for online optimizers")
                        .takes_value(true)
                        .value_name("N")
                        .default_value(&default_epochs),
                )
                .arg(
                    clap::Arg::with_name("eta")
                        .long("eta")
                        .help("Step size for online optimizers")
                        .takes_value(true)
                        .value_name("ETA")
                        .default_value(&default_eta),
                )
                .arg(
                    clap::Arg::with_name("adagrad_eps")
                        .long("adagrad_eps")
                        .help("Defines the starting step size for AdaGrad")
                        .takes_value(true)
                        .value_name("EPS")
                        .default_value(&default_adagrad_eps),
                )
                .arg(
                    clap::Arg::with_name("tmax")
                        .long("tmax")
                        .help("Maximum number of online training steps per classifier; -1 for unbounded")
                        .takes_value(true)
                        .value_name("T")
                        .allow_hyphen_values(true)
                        .default_value(&default_tmax),
                )
                .arg(
                    clap::Arg::with_name("cost")
                        .long("cost")
                        .help("Cost co-efficient for regularizing liblinear classifiers")
                        .takes_value(true)
                        .value_name("C")
                        .default_value(&default_cost),
                )
                .arg(
                    clap::Arg::with_name("auto_c_log")
                        .long("auto_c_log")
                        .help("Scale the cost logarithmically with each node's share of examples")
                        .takes_value(false),
                )
                .arg(
                    clap::Arg::with_name("auto_c_lin")
                        .long("auto_c_lin")
                        .help("Scale the cost linearly with each node's share of examples")
                        .takes_value(false),
                )
                .arg(
                    clap::Arg::with_name("eps")
                        .long("eps")
                        .help("Epsilon value for determining liblinear convergence")
                        .takes_value(true)
                        .value_name("EPS")
                        .default_value(&default_eps),
                )
                .arg(
                    clap::Arg::with_name("max_iter")
                        .long("max_iter")
                        .help("Max number of iterations for training each liblinear classifier")
                        .takes_value(true)
                        .value_name("M")
                        .default_value(&default_max_iter),
                )
                .arg(
                    clap::Arg::with_name("weights_threshold")
                        .long("weights_threshold")
                        .help("Threshold for pruning weight vectors of node classifiers")
                        .takes_value(true)
                        .value_name("THRESHOLD")
                        .default_value(&default_weights_threshold),
                )
                .arg(
                    clap::Arg::with_name("inbalance_labels_weighting")
                        .long("inbalance_labels_weighting")
                        .help("Weight node classifier classes by their inbalance")
                        .takes_value(false),
                )
                .arg(
                    clap::Arg::with_name("save_grads")
                        .long("save_grads")
                        .help("Also save gradient accumulators of online optimizers")
                        .takes_value(false),
                ),
        )
        .subcommand(
            clap::SubCommand::with_name("test")
                .about("Test an existing model")
                .arg(
                    clap::Arg::with_name("model_path")
                        .index(1)
                        .help("Path of the directory where the trained model is saved")
                        .required(true)
                        .value_name("MODEL_PATH"),
                )
                .arg(
                    clap::Arg::with_name("test_data")
                        .index(2)
                        .help("Path to test dataset file (in the format of the Extreme Classification Repository)")
                        .required(true)
                        .value_name("TEST_DATA_PATH"),
                )
                .arg(threads_arg.clone())
                .arg(top_k_arg.clone())
                .arg(load_as_arg.clone()),
        )
        .subcommand(
            clap::SubCommand::with_name("predict")
                .about("Print top predictions for every example in a data file")
                .arg(
                    clap::Arg::with_name("model_path")
                        .index(1)
                        .help("Path of the directory where the trained model is saved")
                        .required(true)
                        .value_name("MODEL_PATH"),
                )
                .arg(
                    clap::Arg::with_name("data")
                        .index(2)
                        .help("Path to dataset file (in the format of the Extreme Classification Repository)")
                        .required(true)
                        .value_name("DATA_PATH"),
                )
                .arg(threads_arg)
                .arg(top_k_arg)
                .arg(load_as_arg),
        )
        .get_matches();

    if let Some(arg_matches) = arg_matches.subcommand_matches("train") {
        train(&arg_matches);
    } else if let Some(arg_matches) = arg_matches.subcommand_matches("test") {
        test(&arg_matches);
    } else if let Some(arg_matches) = arg_matches.subcommand_matches("predict") {
        predict(&arg_matches);
    } else {
        println!("{}", arg_matches.usage());
    }
}
