/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::anyhow;
use clap::{Arg, ArgAction, Command, value_parser};

const ARG_LISTEN: &str = "listen";
const ARG_CA_CERT: &str = "ca-cert";
const ARG_CA_KEY: &str = "ca-key";
const ARG_GENERATE_CA: &str = "generate-ca";
const ARG_CA_COMMON_NAME: &str = "ca-common-name";
const ARG_ORGANIZATION: &str = "organization";
const ARG_LEAF_VALIDITY: &str = "leaf-validity";
const ARG_MODIFIERS: &str = "modifiers";
const ARG_UPSTREAM_CA: &str = "upstream-ca";
const ARG_INSECURE_UPSTREAM: &str = "insecure-upstream";
const ARG_LOG_STREAM: &str = "log-stream";
const ARG_BODY_LIMIT: &str = "body-limit";
const ARG_VERBOSE: &str = "verbose";

pub struct ProcArgs {
    pub listen: SocketAddr,
    pub ca_cert: Option<PathBuf>,
    pub ca_key: Option<PathBuf>,
    pub generate_ca: bool,
    pub ca_common_name: String,
    pub organization: String,
    pub leaf_validity: Duration,
    pub modifier_file: Option<PathBuf>,
    pub upstream_ca: Option<PathBuf>,
    pub insecure_upstream: bool,
    pub log_stream: Option<SocketAddr>,
    pub body_limit: usize,
    pub verbose_level: u8,
}

pub fn parse_clap() -> anyhow::Result<ProcArgs> {
    let args = Command::new("mitmd")
        .arg(
            Arg::new(ARG_LISTEN)
                .help("Listen address for the proxy")
                .long(ARG_LISTEN)
                .short('l')
                .num_args(1)
                .default_value("127.0.0.1:8080")
                .value_parser(value_parser!(SocketAddr)),
        )
        .arg(
            Arg::new(ARG_CA_CERT)
                .help("Root CA certificate file (output file with --generate-ca)")
                .long(ARG_CA_CERT)
                .num_args(1)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new(ARG_CA_KEY)
                .help("Root CA private key file (output file with --generate-ca)")
                .long(ARG_CA_KEY)
                .num_args(1)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new(ARG_GENERATE_CA)
                .help("Generate a fresh root authority instead of loading one")
                .long(ARG_GENERATE_CA)
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(ARG_CA_COMMON_NAME)
                .help("Common name for a generated root authority")
                .long(ARG_CA_COMMON_NAME)
                .num_args(1)
                .default_value("mitmd root authority"),
        )
        .arg(
            Arg::new(ARG_ORGANIZATION)
                .help("Organization name on issued certificates")
                .long(ARG_ORGANIZATION)
                .num_args(1)
                .default_value("mitmd"),
        )
        .arg(
            Arg::new(ARG_LEAF_VALIDITY)
                .help("Validity window of issued leaf certificates, in seconds, around now")
                .long(ARG_LEAF_VALIDITY)
                .num_args(1)
                .default_value("3600")
                .value_parser(value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_MODIFIERS)
                .help("JSON modifier configuration file")
                .long(ARG_MODIFIERS)
                .short('m')
                .num_args(1)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new(ARG_UPSTREAM_CA)
                .help("PEM bundle of CA certificates trusted for upstream connections")
                .long(ARG_UPSTREAM_CA)
                .num_args(1)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new(ARG_INSECURE_UPSTREAM)
                .help("Skip upstream certificate verification (testing only)")
                .long(ARG_INSECURE_UPSTREAM)
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(ARG_LOG_STREAM)
                .help("Stream binary traffic log frames to this TCP address")
                .long(ARG_LOG_STREAM)
                .num_args(1)
                .value_parser(value_parser!(SocketAddr)),
        )
        .arg(
            Arg::new(ARG_BODY_LIMIT)
                .help("Cap on buffered message bodies in bytes, 0 to disable")
                .long(ARG_BODY_LIMIT)
                .num_args(1)
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new(ARG_VERBOSE)
                .help("Increase log verbosity")
                .short('v')
                .action(ArgAction::Count),
        )
        .get_matches();

    let proc_args = ProcArgs {
        listen: *args.get_one::<SocketAddr>(ARG_LISTEN).unwrap(),
        ca_cert: args.get_one::<PathBuf>(ARG_CA_CERT).cloned(),
        ca_key: args.get_one::<PathBuf>(ARG_CA_KEY).cloned(),
        generate_ca: args.get_flag(ARG_GENERATE_CA),
        ca_common_name: args
            .get_one::<String>(ARG_CA_COMMON_NAME)
            .unwrap()
            .clone(),
        organization: args.get_one::<String>(ARG_ORGANIZATION).unwrap().clone(),
        leaf_validity: Duration::from_secs(*args.get_one::<u64>(ARG_LEAF_VALIDITY).unwrap()),
        modifier_file: args.get_one::<PathBuf>(ARG_MODIFIERS).cloned(),
        upstream_ca: args.get_one::<PathBuf>(ARG_UPSTREAM_CA).cloned(),
        insecure_upstream: args.get_flag(ARG_INSECURE_UPSTREAM),
        log_stream: args.get_one::<SocketAddr>(ARG_LOG_STREAM).copied(),
        body_limit: args
            .get_one::<usize>(ARG_BODY_LIMIT)
            .copied()
            .unwrap_or(mitm_http::DEFAULT_BODY_LIMIT),
        verbose_level: args.get_count(ARG_VERBOSE),
    };

    if !proc_args.generate_ca && (proc_args.ca_cert.is_none() || proc_args.ca_key.is_none()) {
        return Err(anyhow!(
            "either --generate-ca or both --ca-cert and --ca-key are required"
        ));
    }

    Ok(proc_args)
}
