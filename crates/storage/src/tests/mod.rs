mod env_tests;
mod txn_tests;
