// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Shared domain records, identifiers, retry policy, and app config for the
//! storefront ledger.

pub mod config;
pub mod ids;
pub mod retry;
pub mod types;
