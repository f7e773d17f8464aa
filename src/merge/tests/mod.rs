mod tests_merge_iter;
