pub mod lossyinto;
