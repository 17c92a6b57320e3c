//! Integration tests package lib
#![allow(dead_code)]

mod utils;


#[cfg(test)]
mod retry_policy_test;

#[cfg(test)]
mod proxy_routing_test;
