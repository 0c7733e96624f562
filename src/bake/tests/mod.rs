mod test_curved_basic;
mod test_planar_basic;
mod test_scene_io;
mod test_tangent_basic;
