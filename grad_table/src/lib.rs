pub mod grad_table;
