mod context_test;
mod reconcile_test;
mod test_utils;
